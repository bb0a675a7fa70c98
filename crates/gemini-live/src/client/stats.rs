use traffic_live_types::server::UsageMetadata;

/// Token usage accumulated from `usageMetadata` frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    total_tokens: u64,
    prompt_tokens: u64,
    response_tokens: u64,
    messages_received: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_message(&mut self) {
        self.messages_received += 1;
    }

    pub(crate) fn update_usage(&mut self, usage: &UsageMetadata) {
        self.total_tokens += u64::from(usage.total_token_count.unwrap_or(0));
        self.prompt_tokens += u64::from(usage.prompt_token_count.unwrap_or(0));
        self.response_tokens += u64::from(usage.response_token_count.unwrap_or(0));
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn response_tokens(&self) -> u64 {
        self.response_tokens
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates_and_ignores_missing_counts() {
        let mut stats = Stats::new();
        stats.update_usage(&UsageMetadata {
            prompt_token_count: Some(10),
            response_token_count: Some(5),
            total_token_count: Some(15),
        });
        stats.update_usage(&UsageMetadata {
            prompt_token_count: None,
            response_token_count: Some(3),
            total_token_count: Some(3),
        });
        assert_eq!(stats.total_tokens(), 18);
        assert_eq!(stats.prompt_tokens(), 10);
        assert_eq!(stats.response_tokens(), 8);
    }
}
