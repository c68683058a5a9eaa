mod format;
#[cfg(test)]
pub mod mocks;
mod provision;
mod proxy;
mod source;
mod types;
mod ytdlp;

pub use format::{select_format, SelectionError, SelectionRequest};
pub use provision::{ProvisionOutcome, Provisioner};
pub use proxy::{ProxyError, ProxyJob, StreamProxy, TokioProcessRunner};
pub use source::MetadataSource;
pub use types::Platform;
#[cfg(test)]
pub use types::VideoInfo;
pub use ytdlp::YtDlp;
