pub mod decoder;
pub mod filter;
pub mod scanner;

pub use decoder::{decode_payload, DecodeError};
pub use filter::{AdvertisementFilter, Rejection, UNITY_SERVICE};
pub use scanner::{spawn_adapter_driver, BluerRadio};
