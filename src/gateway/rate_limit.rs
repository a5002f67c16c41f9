//! 按客户端 IP 的固定窗口限流（默认 60 秒 60 次）

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::core::GatewayError;
use crate::gateway::state::AppState;

/// 超过该数量的计数器时顺带清理已过期窗口
const PRUNE_THRESHOLD: usize = 1024;

pub struct FixedWindowLimiter {
    window: Duration,
    max_requests: u32,
    counters: Mutex<HashMap<IpAddr, (Instant, u32)>>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// 计入一次请求；返回是否放行
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        if counters.len() > PRUNE_THRESHOLD {
            let window = self.window;
            counters.retain(|_, (start, _)| now.duration_since(*start) < window);
        }

        let entry = counters.entry(ip).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        if entry.1 >= self.max_requests {
            return false;
        }
        entry.1 += 1;
        true
    }
}

/// 中间件：无连接信息时（如进程内调用）归入同一个桶
pub async fn enforce(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if state.config.rate_limit.enabled {
        let ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        if !state.limiter.check(ip) {
            tracing::warn!(%ip, "rate limit exceeded");
            return Err(GatewayError::RateLimited);
        }
    }
    Ok(next.run(request).await)
}
