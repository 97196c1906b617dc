//! CLI 서브커맨드 구현.

pub mod publish;
pub mod tail;
pub mod topics;

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use stockdash_core::config::{AppConfig, RealtimeConfig};
use stockdash_realtime::ConnectionManager;
use tokio::time::sleep;
use tracing::warn;

/// 설정 파일에서 realtime 설정을 로드합니다.
///
/// 파일이 없으면 기본값으로 동작합니다 — CLI는 `--url`만으로도 쓸 수
/// 있어야 합니다.
pub fn load_realtime_config(path: &str, url: Option<String>) -> anyhow::Result<RealtimeConfig> {
    let mut realtime = if Path::new(path).exists() {
        AppConfig::load(path)
            .with_context(|| format!("설정 파일 로드 실패: {}", path))?
            .realtime
    } else {
        warn!(path, "설정 파일 없음, 기본값 사용");
        RealtimeConfig::default()
    };

    if url.is_some() {
        realtime.ws_url = url;
    }

    Ok(realtime)
}

/// 연결이 완료될 때까지 대기합니다.
///
/// 연결은 비동기로 진행되므로 상태를 폴링합니다. 재연결 백오프까지
/// 포함해서 기다리지는 않습니다 — CLI는 첫 연결이 안 되면 바로 실패하는
/// 편이 낫습니다.
pub async fn wait_connected(manager: &ConnectionManager, timeout: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if manager.is_connected().await {
            return Ok(());
        }
        sleep(Duration::from_millis(50)).await;
    }
    bail!("연결 시간 초과 (현재 상태: {})", manager.status().await)
}
