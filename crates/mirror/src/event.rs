use common::data::ChatMessage;
use faststr::FastStr;

/// State change surfaced by a running mirror. The consumer renders these
/// however it likes; the mirror itself never touches a view layer.
#[derive(Debug, Clone)]
pub enum MirrorEvent {
    /// A group from the membership index finished loading its metadata.
    GroupJoined { key: FastStr, name: FastStr },
    /// The group was dropped from the index and its listeners detached.
    GroupLeft { key: FastStr },
    /// A message arrived in a joined group, author already joined in from
    /// the user cache.
    Message {
        group:   FastStr,
        author:  FastStr,
        message: ChatMessage,
    },
}
