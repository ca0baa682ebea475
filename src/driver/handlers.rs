//! Pluggable client-capability handlers.
//!
//! The driver advertises the `fs` and `terminal` client capabilities only
//! when a handler is installed. Peer requests for an absent capability are
//! answered with [`crate::acp::protocol::UNSUPPORTED_CAPABILITY`]; when a
//! handler is present its result is forwarded back as the JSON-RPC response.

use serde_json::Value;

use crate::acp::connection::BoxFuture;
use crate::acp::protocol::{ReadTextFileParams, RpcError, WriteTextFileParams};
use crate::Result;

/// File-system callbacks served on behalf of the peer.
pub trait FileSystemHandler: Send + Sync + 'static {
    /// Serve `fs/read_text_file`; returns the file content.
    fn read_text_file(&self, params: ReadTextFileParams) -> BoxFuture<'_, Result<String>>;

    /// Serve `fs/write_text_file`.
    fn write_text_file(&self, params: WriteTextFileParams) -> BoxFuture<'_, Result<()>>;
}

/// Terminal callbacks served on behalf of the peer.
///
/// The terminal surface is routed generically: the driver does not interpret
/// the four `terminal/*` methods beyond forwarding them here.
pub trait TerminalHandler: Send + Sync + 'static {
    /// Serve one `terminal/*` request.
    fn call(
        &self,
        method: String,
        params: Value,
    ) -> BoxFuture<'_, std::result::Result<Value, RpcError>>;
}
