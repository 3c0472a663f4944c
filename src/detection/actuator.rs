//! Actuator policy: detected classes -> one mutually exclusive output signal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::ClassLabel;

/// Output state of the warning actuator.
///
/// Each signal other than `None` has its own output pin, and at most one pin is high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorSignal {
    /// All pins low
    #[default]
    None,
    /// Only a forklift is in view
    Forklift,
    /// Only a person is in view
    Person,
    /// Forklift and person share the frame (danger)
    Both,
}

impl ActuatorSignal {
    /// Whether this signal marks the danger condition that drives recording.
    pub fn is_danger(&self) -> bool {
        matches!(self, ActuatorSignal::Both)
    }
}

impl fmt::Display for ActuatorSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActuatorSignal::None => "none",
            ActuatorSignal::Forklift => "forklift",
            ActuatorSignal::Person => "person",
            ActuatorSignal::Both => "both",
        };
        f.write_str(name)
    }
}

/// Map the set of classes seen in one frame to the actuator signal.
///
/// `Both` is checked first; `Driver` does not participate.
pub fn signal(detected: &BTreeSet<ClassLabel>) -> ActuatorSignal {
    let forklift = detected.contains(&ClassLabel::Forklift);
    let person = detected.contains(&ClassLabel::Person);
    match (forklift, person) {
        (true, true) => ActuatorSignal::Both,
        (true, false) => ActuatorSignal::Forklift,
        (false, true) => ActuatorSignal::Person,
        (false, false) => ActuatorSignal::None,
    }
}
