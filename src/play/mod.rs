//! Frame-driven gameplay simulation. Single-threaded: a session is owned
//! and stepped by one loop and nothing else touches its chart.

pub mod autoplay;
pub mod clock;
pub mod judge;
pub mod results;
pub mod session;
pub mod speed;
pub mod transport;

pub use autoplay::Autoplay;
pub use judge::{JudgmentEvent, JudgmentKind, JudgmentStats};
pub use results::{Rank, SessionResults};
pub use session::{GameSession, InputEvent, SessionError};
pub use transport::{AudioTransport, SimulatedTransport};
