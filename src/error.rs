// IMPULSE ERROR TAXONOMY
// ONLY TWO KINDS EVER SURFACE TO THE HOST: BAD TUNABLE INPUT AND
// LIFECYCLE EVENTS IN THE WRONG STATE. EVERYTHING ELSE (MEASUREMENT
// GLITCHES, TRANSITION RACES, TABLE LOOKUP MISSES) IS RECOVERED
// IN PLACE -- WORST CASE IS HOLDING THE CURRENT STATE FOR ONE TICK.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorError {
    // A TUNABLE SETTER GOT AN OUT-OF-RANGE VALUE. PRIOR VALUE RETAINED.
    InvalidInput(&'static str),
    // A LIFECYCLE EVENT ARRIVED IN A STATE THAT DOES NOT SUPPORT IT.
    InvalidState(&'static str),
}

impl fmt::Display for GovernorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GovernorError::InvalidInput(what) => write!(f, "invalid input: {}", what),
            GovernorError::InvalidState(what) => write!(f, "invalid state: {}", what),
        }
    }
}

impl std::error::Error for GovernorError {}

pub type Result<T> = std::result::Result<T, GovernorError>;
