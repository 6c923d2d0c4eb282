pub mod args;
pub mod op;
pub mod ops;

pub use ops::{Audit, Cloud, Decrypt, Encrypt, Init, Key, Open, Seal, Version};
