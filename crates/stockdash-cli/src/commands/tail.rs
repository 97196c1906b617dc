//! 실시간 메시지 tail.
//!
//! 서버에 연결해서 수신 메시지를 JSON line으로 출력합니다. Ctrl-C로
//! 종료합니다. 스크립트에서 `jq` 등으로 바로 파이프할 수 있도록 메시지
//! 외의 출력은 stderr/로그로만 내보냅니다.

use std::time::Duration;

use anyhow::Context;
use stockdash_core::config::RealtimeConfig;
use stockdash_core::message::Topic;
use stockdash_realtime::{ConnectionManager, SubscriptionHandle, TopicRegistry};
use tracing::{info, warn};

/// tail 커맨드 실행.
///
/// `topics`는 쉼표로 구분된 토픽 이름 목록입니다. 생략하면 모든 알려진
/// 토픽을 구독합니다. 알려지지 않은 이름도 문자열 토픽으로 구독됩니다.
pub async fn run(config: RealtimeConfig, topics: Option<String>) -> anyhow::Result<()> {
    let registry = TopicRegistry::new();

    let selected: Vec<Topic> = match &topics {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Topic::from_name)
            .collect(),
        None => Topic::KNOWN
            .iter()
            .filter(|t| !t.is_heartbeat())
            .cloned()
            .collect(),
    };

    if selected.is_empty() {
        anyhow::bail!("구독할 토픽이 없습니다");
    }

    let _subscriptions: Vec<SubscriptionHandle> = selected
        .iter()
        .map(|topic| {
            registry.subscribe(topic.clone(), |envelope| match envelope.to_json() {
                Ok(json) => println!("{}", json),
                Err(e) => warn!(error = %e, "메시지 직렬화 실패"),
            })
        })
        .collect();

    info!(
        url = %config.websocket_url(),
        topics = %selected
            .iter()
            .map(Topic::name)
            .collect::<Vec<_>>()
            .join(","),
        "tail 시작"
    );

    let manager = ConnectionManager::new(config, registry);
    manager.connect().await;
    super::wait_connected(&manager, Duration::from_secs(15)).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Ctrl-C 핸들러 등록 실패")?;

    info!("종료 시그널 수신");
    manager.disconnect().await;

    Ok(())
}
