use faststr::FastStr;
use serde::{Deserialize, Serialize};

/// Profile record under `users/<id>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: FastStr,
}
