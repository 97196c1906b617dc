//! 메시지 발행.
//!
//! 개발/스테이징 서버에 단건 메시지를 보내는 디버깅 도구입니다.

use std::time::Duration;

use anyhow::Context;
use stockdash_core::config::RealtimeConfig;
use stockdash_core::message::{Envelope, Topic};
use stockdash_realtime::{ConnectionManager, TopicRegistry};
use tracing::info;

/// publish 커맨드 실행.
pub async fn run(config: RealtimeConfig, topic: &str, payload: &str) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("payload가 올바른 JSON이 아닙니다")?;

    let envelope = Envelope::new(Topic::from_name(topic), payload);

    let manager = ConnectionManager::new(config, TopicRegistry::new());
    manager.connect().await;
    super::wait_connected(&manager, Duration::from_secs(15)).await?;

    manager
        .send(envelope.clone())
        .await
        .context("메시지 전송 실패")?;

    info!(topic = %envelope.topic, id = %envelope.id, "메시지 발행 완료");
    println!("발행됨: {}", envelope.to_json()?);

    manager.disconnect().await;
    Ok(())
}
