//! The conversation side of PAM: typed messages in, wiped response buffers
//! out, and (with the `libpam` feature) a transaction that drives it.

pub use converse::{
    converse, CLIConverser, ConversationHandler, ConversationMessage, ConversationResponse,
    Converser, ConverserConfig, PamMessageStyle, ResponseFn,
};
pub use error::{PamError, PamErrorType, PamResult};
pub use securemem::PamBuffer;

pub(crate) use securemem::wipe_memory;
#[cfg(test)]
pub(crate) use securemem::live;

#[cfg(feature = "libpam")]
pub use context::{CredentialAction, PamContext, PamItem};

#[cfg(feature = "libpam")]
mod context;
mod converse;
mod error;
mod securemem;

#[allow(nonstandard_style)]
pub mod sys;
