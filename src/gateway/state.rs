use std::time::{Duration, Instant};

/// 1つのシャードの接続状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayState {
    pub token: String,
    pub gateway_url: String,
    pub shard_id: u32,
    pub shard_count: u32,
    /// READYで受け取ったセッションID。RESUMEに使います。
    pub session_id: Option<String>,
    /// 最後に受信したシーケンス番号
    pub sequence: Option<u64>,
}

impl GatewayState {
    pub fn new(token: impl Into<String>, gateway_url: impl Into<String>, shard_id: u32, shard_count: u32) -> Self {
        Self {
            token: token.into(),
            gateway_url: gateway_url.into(),
            shard_id,
            shard_count,
            session_id: None,
            sequence: None,
        }
    }
}

/// ハートビートの統計
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatStats {
    pub heartbeats: u64,
    pub heartbeat_acks: u64,
    pub last_heartbeat_time: Option<Instant>,
    pub last_ack_time: Option<Instant>,
}

impl HeartbeatStats {
    /// 直近のハートビートからACKまでの時間
    pub fn gw_time(&self) -> Option<Duration> {
        let sent = self.last_heartbeat_time?;
        let acked = self.last_ack_time?;
        acked.checked_duration_since(sent)
    }

    /// ACKが返らないままハートビートを送り続けている状態
    pub fn is_zombied(&self) -> bool {
        self.heartbeats > self.heartbeat_acks + 1
    }

    pub fn clear_counters(&mut self) {
        self.heartbeats = 0;
        self.heartbeat_acks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gw_time() {
        let mut stats = HeartbeatStats::default();
        assert_eq!(stats.gw_time(), None, "未送信でレイテンシが返されました。");

        let now = Instant::now();
        stats.last_heartbeat_time = Some(now);
        stats.last_ack_time = Some(now + Duration::from_millis(120));
        assert_eq!(stats.gw_time(), Some(Duration::from_millis(120)));

        // ACKの方が古い(次のハートビートを送った直後)
        stats.last_heartbeat_time = Some(now + Duration::from_millis(500));
        assert_eq!(stats.gw_time(), None);
    }

    #[test]
    fn test_zombie() {
        let mut stats = HeartbeatStats { heartbeats: 1, ..Default::default() };
        assert!(!stats.is_zombied());
        stats.heartbeats = 2;
        assert!(stats.is_zombied(), "ACKが2回分返っていないのにゾンビ判定されませんでした。");
        stats.heartbeat_acks = 1;
        assert!(!stats.is_zombied());

        stats.clear_counters();
        assert_eq!((stats.heartbeats, stats.heartbeat_acks), (0, 0));
    }
}
