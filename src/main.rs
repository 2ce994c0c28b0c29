use anyhow::Result;
use common::data::ChatMessage;
use dotenvy::dotenv;
use faststr::FastStr;
use mirror::{MembershipMirror, MirrorEvent};
use serde_json::json;
use source::{MemorySource, TreePath, ValueSink};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = common::logging_stdout();
    dotenv().ok();

    let user = std::env::var("MIRRORLAKE_USER").unwrap_or_else(|_| "chuck".into());

    let lake = MemorySource::new();
    seed_demo_data(&lake)?;

    let (handle, mut events) = MembershipMirror::spawn(lake.clone(), user)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                MirrorEvent::GroupJoined { key, name } => {
                    info!(group = %key, name = %name, "joined group");
                }
                MirrorEvent::GroupLeft { key } => {
                    info!(group = %key, "left group");
                }
                MirrorEvent::Message {
                    group,
                    author,
                    message,
                } => {
                    info!(group = %group, author = %author, body = %message.message, "message");
                }
            }
        }
    });

    // The scripted actions the demo checkboxes used to drive.
    handle.join_group("techies")?;
    post_message(&lake, "techies", "m1", "mary", "hello chuck!")?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    post_message(&lake, "techies", "m2", "bill", "welcome aboard")?;
    handle.join_group("fans")?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.leave_group("techies")?;
    post_message(&lake, "techies", "m3", "mary", "anyone still here?")?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.shutdown().await;
    printer.await?;
    Ok(())
}

fn seed_demo_data(lake: &MemorySource) -> Result<()> {
    let dataset = json!({
        "users": {
            "chuck": { "name": "Chuck Norris" },
            "mary":  { "name": "Mary Chen" },
            "bill":  { "name": "Bill of Rights" }
        },
        "groups": {
            "techies": {
                "name":    "Techies",
                "members": { "mary": true, "bill": true }
            },
            "fans": {
                "name":    "Mirror Fans",
                "members": { "mary": true }
            }
        },
        "messages": {
            "techies": {
                "m0": { "user": "mary", "message": "anyone around?" }
            }
        }
    });

    for (subtree, value) in dataset.as_object().into_iter().flatten() {
        lake.put(&TreePath::parse(subtree)?, value.clone())?;
    }
    info!("demo dataset seeded");
    Ok(())
}

fn post_message(
    lake: &MemorySource,
    group: &str,
    id: &str,
    user: &str,
    text: &str,
) -> Result<()> {
    let path = TreePath::parse("messages")?
        .child(FastStr::new(group))
        .child(FastStr::new(id));
    lake.put(&path, serde_json::to_value(ChatMessage::new(user, text))?)?;
    Ok(())
}
