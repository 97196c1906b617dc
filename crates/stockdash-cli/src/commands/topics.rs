//! 알려진 토픽 목록.

use stockdash_core::message::Topic;

fn describe(topic: &Topic) -> &'static str {
    match topic {
        Topic::PriceUpdate => "실시간 가격 업데이트",
        Topic::AiAnalysis => "AI 분석 결과",
        Topic::SystemMetrics => "시스템 메트릭",
        Topic::Notification => "일반 알림",
        Topic::PortfolioUpdate => "포트폴리오 업데이트",
        Topic::TradeExecution => "체결 내역",
        Topic::BacktestProgress => "백테스트 진행률",
        Topic::Ping => "하트비트 ping (클라이언트 → 서버)",
        Topic::Pong => "하트비트 pong (서버 → 클라이언트, 구독자에게 전달되지 않음)",
        Topic::Other(_) => "",
    }
}

/// 알려진 토픽 목록 출력.
pub fn print_known_topics() {
    println!("알려진 토픽:");
    for topic in &Topic::KNOWN {
        println!("  {:<20} {}", topic.name(), describe(topic));
    }
    println!("\n목록에 없는 토픽 이름도 문자열 그대로 구독/발행할 수 있습니다.");
}
