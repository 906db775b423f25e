use std::fmt;
use thiserror::Error;

/// The write rules an envelope can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    MapReport,
    NodeIdentity,
    Position,
    Packet,
    Sighting,
    Traceroute,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rule::MapReport => "map-report",
            Rule::NodeIdentity => "node-identity",
            Rule::Position => "position",
            Rule::Packet => "packet",
            Rule::Sighting => "sighting",
            Rule::Traceroute => "traceroute",
        };
        f.write_str(name)
    }
}

/// Why a rule wrote nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("payload did not decode: {0}")]
    Decode(String),

    #[error("envelope carries no gateway id")]
    MissingGateway,

    #[error("gateway id '{0}' is not a hex node id")]
    InvalidGateway(String),

    #[error("user record has an empty id")]
    EmptyUserId,

    #[error("position has no fix")]
    NoFix,

    #[error("no node with id !{0:08x}")]
    UnknownNode(u32),
}

impl SkipReason {
    /// Anomalies an operator should hear about, as opposed to routine
    /// outcomes such as a position report without a fix.
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            SkipReason::Decode(_)
                | SkipReason::MissingGateway
                | SkipReason::InvalidGateway(_)
                | SkipReason::EmptyUserId
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// Rows were inserted or updated.
    Applied,
    /// The row already existed; nothing written.
    Duplicate,
    Skipped(SkipReason),
}

/// What one envelope's unit of work did, rule by rule.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeReport {
    pub packet_id: u32,
    pub port: String,
    pub outcomes: Vec<(Rule, RuleOutcome)>,
}

impl EnvelopeReport {
    pub fn new(packet_id: u32, port: String) -> Self {
        Self {
            packet_id,
            port,
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, rule: Rule, outcome: RuleOutcome) {
        self.outcomes.push((rule, outcome));
    }

    pub fn outcome(&self, rule: Rule) -> Option<&RuleOutcome> {
        self.outcomes
            .iter()
            .find(|(r, _)| *r == rule)
            .map(|(_, outcome)| outcome)
    }

    pub fn skipped(&self) -> impl Iterator<Item = (Rule, &SkipReason)> + '_ {
        self.outcomes.iter().filter_map(|(rule, outcome)| match outcome {
            RuleOutcome::Skipped(reason) => Some((*rule, reason)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lookup_and_skips() {
        let mut report = EnvelopeReport::new(7, "TEXT_MESSAGE_APP".into());
        report.push(Rule::Packet, RuleOutcome::Applied);
        report.push(
            Rule::Sighting,
            RuleOutcome::Skipped(SkipReason::MissingGateway),
        );
        assert_eq!(report.outcome(Rule::Packet), Some(&RuleOutcome::Applied));
        assert_eq!(report.outcome(Rule::Position), None);
        let skipped: Vec<_> = report.skipped().collect();
        assert_eq!(skipped, vec![(Rule::Sighting, &SkipReason::MissingGateway)]);
        assert!(SkipReason::MissingGateway.is_anomaly());
        assert!(!SkipReason::NoFix.is_anomaly());
        assert_eq!(Rule::NodeIdentity.to_string(), "node-identity");
    }
}
