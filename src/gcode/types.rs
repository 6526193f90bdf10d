/// Command class of a g-code line, decided once at parse time.
///
/// Only `Move` lines carrying both axes are eligible for the belt-length
/// transform; everything else passes through the pipeline untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    /// A G0 (rapid) or G1 (linear) move and whatever axis words it carries.
    Move {
        rapid: bool,
        x: Option<f64>,
        y: Option<f64>,
    },
    /// Any other line, including ones we cannot parse.
    Other,
}

impl MotionCommand {
    /// True when the line is a move specifying both X and Y.
    pub fn is_eligible(&self) -> bool {
        matches!(
            self,
            Self::Move {
                x: Some(_),
                y: Some(_),
                ..
            }
        )
    }
}
