// =============================================================================
// Block Order Router — institutional tagging over the broker client
// =============================================================================
//
// Block orders are tagged with an agreed routing prefix so the clearing firm
// can attribute our aggregate volume for rebates. The tag doubles as the
// client_order_id, which brokers cap at 48 characters.
// =============================================================================

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::broker::{BrokerClient, BrokerResult, OrderAck, OrderRequest};

/// Broker-imposed ceiling on client_order_id length.
const CLIENT_ORDER_ID_MAX: usize = 48;

pub struct BlockRouter {
    broker: Arc<dyn BrokerClient>,
    ib_tag: String,
}

impl BlockRouter {
    pub fn new(broker: Arc<dyn BrokerClient>, ib_tag: impl Into<String>) -> Self {
        Self {
            broker,
            ib_tag: ib_tag.into(),
        }
    }

    /// Build a unique client_order_id embedding the routing prefix and the
    /// originating strategy: `{IB_TAG}-{STRATEGY[:10]}-{UUID4[:8]}`,
    /// hard-capped at 48 characters.
    pub fn generate_routing_tag(&self, strategy_name: &str) -> String {
        let strat_short: String = strategy_name
            .replace(' ', "")
            .chars()
            .take(10)
            .collect::<String>()
            .to_uppercase();
        let unique: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();

        let tag = format!("{}-{}-{}", self.ib_tag, strat_short, unique);
        tag.chars().take(CLIENT_ORDER_ID_MAX).collect()
    }

    /// Tag and submit one aggregated block order.
    pub async fn submit_block_order(
        &self,
        strategy_name: &str,
        mut request: OrderRequest,
    ) -> BrokerResult<OrderAck> {
        let routing_tag = self.generate_routing_tag(strategy_name);

        info!(
            tag = %routing_tag,
            symbol = %request.symbol,
            qty = %request.qty,
            side = %request.side,
            order_type = %request.order_type,
            "routing block order"
        );

        request.client_order_id = Some(routing_tag);
        self.broker.submit_order(request).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::MockBroker;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    #[test]
    fn tag_embeds_prefix_and_strategy() {
        let router = BlockRouter::new(Arc::new(MockBroker::default()), "PFRM_IB");
        let tag = router.generate_routing_tag("momentum breakout v1");
        assert!(tag.starts_with("PFRM_IB-MOMENTUMBR-"));
        assert!(tag.len() <= 48);
        // Strategy segment is truncated to 10 chars with spaces stripped.
        let parts: Vec<&str> = tag.split('-').collect();
        assert_eq!(parts[1].len(), 10);
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn tag_is_unique_per_call() {
        let router = BlockRouter::new(Arc::new(MockBroker::default()), "PFRM_IB");
        let a = router.generate_routing_tag("momentum_v1");
        let b = router.generate_routing_tag("momentum_v1");
        assert_ne!(a, b);
    }

    #[test]
    fn oversized_prefix_is_hard_capped() {
        let long_tag = "X".repeat(60);
        let router = BlockRouter::new(Arc::new(MockBroker::default()), long_tag);
        let tag = router.generate_routing_tag("momentum_v1");
        assert_eq!(tag.len(), 48);
    }

    #[tokio::test]
    async fn submit_attaches_tag_to_order() {
        let broker = Arc::new(MockBroker::filling_at(dec!(150.25)));
        let router = BlockRouter::new(broker.clone(), "PFRM_IB");

        let ack = router
            .submit_block_order(
                "momentum_v1",
                OrderRequest::new("AAPL", dec!(10), Side::Buy),
            )
            .await
            .unwrap();

        assert_eq!(ack.symbol, "AAPL");
        assert_eq!(ack.filled_avg_price, Some(dec!(150.25)));

        let submitted = broker.submitted.lock();
        assert_eq!(submitted.len(), 1);
        let coid = submitted[0].client_order_id.as_deref().unwrap();
        assert!(coid.starts_with("PFRM_IB-MOMENTUM_V-"));
    }
}
