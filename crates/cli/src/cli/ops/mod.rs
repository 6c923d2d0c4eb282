pub mod audit;
pub mod cloud;
pub mod crypt;
pub mod init;
pub mod key;
pub mod seal;
pub mod version;

pub use audit::Audit;
pub use cloud::Cloud;
pub use crypt::{Decrypt, Encrypt};
pub use init::Init;
pub use key::Key;
pub use seal::{Open, Seal};
pub use version::Version;
