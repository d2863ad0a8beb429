pub mod swap;
pub mod transition;

pub use swap::{NewSwapRow, SwapRow};
pub use transition::{NewTransitionRow, TransitionRow};
