pub mod types;
pub mod interface;
pub mod sender;


pub use types::*;
pub use interface::ClaudeApiClient;
pub use sender::MessageSender;
