pub mod clock;
pub mod error;
pub mod shutdown;
pub mod system;

pub use clock::*;
pub use error::*;
pub use shutdown::*;
pub use system::*;
