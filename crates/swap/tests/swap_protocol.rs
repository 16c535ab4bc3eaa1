//! Integration tests for the atomic-swap protocol
//!
//! Two real coordinators talk over the in-memory transport and settle
//! against one shared in-memory chain. These tests verify the safety
//! properties of the handshake:
//! - a completed trade settles both sides, never one
//! - every failure before lock finality releases the reserved orders
//! - every failure after lock finality ends in a refund, never a loss
//! - an order can be reserved by exactly one session at a time

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bazaar_orderbook::{Matcher, OrderEvent, OrderLedger, OrderPair};
use bazaar_sdk::messaging::{MemoryPeer, MemoryTransport, Messenger};
use bazaar_sdk::types::{Order, OrderState, Side};
use bazaar_sdk::wire::{PeerEvent, PeerMessage, SwapMessage, direct_room};
use bazaar_swap::{
	ChainClient, MemoryChain, RetryPolicy, SessionOutcome, SwapConfig, SwapCoordinator, SwapError,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn quick_config() -> SwapConfig {
	SwapConfig {
		settlement_asset: "gold".to_string(),
		response_timeout: Duration::from_millis(400),
		counter_lock_timeout: Duration::from_millis(600),
		initiator_lock_timeout: Duration::from_millis(900),
		responder_lock_timeout: Duration::from_millis(500),
		secret_poll_interval: Duration::from_millis(20),
		retry: RetryPolicy {
			max_attempts: 3,
			initial_backoff: Duration::from_millis(10),
			max_backoff: Duration::from_millis(40),
		},
	}
}

struct TestPeer {
	ledger: Arc<Mutex<OrderLedger>>,
	coordinator: Arc<SwapCoordinator>,
	outcomes: UnboundedReceiver<SessionOutcome>,
	// Keeps the peer's transport registration alive for the scenario
	#[allow(dead_code)]
	messenger: Arc<MemoryPeer>,
}

/// Build a peer with a live coordinator; `routed` wires its inbox to
/// the coordinator the way the synchronizer would
fn make_peer(
	transport: &Arc<MemoryTransport>,
	chain: &Arc<MemoryChain>,
	account: &str,
	routed: bool,
) -> TestPeer {
	make_peer_with(transport, chain, account, routed, quick_config())
}

fn make_peer_with(
	transport: &Arc<MemoryTransport>,
	chain: &Arc<MemoryChain>,
	account: &str,
	routed: bool,
	config: SwapConfig,
) -> TestPeer {
	let messenger = Arc::new(transport.connect(account));
	let ledger = Arc::new(Mutex::new(OrderLedger::new()));
	let chain_dyn: Arc<dyn ChainClient> = chain.clone();
	let (coordinator, outcomes) = SwapCoordinator::new(
		account,
		config,
		ledger.clone(),
		chain_dyn,
		messenger.clone() as Arc<dyn Messenger>,
		None,
	);
	let coordinator = Arc::new(coordinator);

	if routed {
		let events = messenger.events();
		let router = coordinator.clone();
		std::thread::spawn(move || {
			while let Ok(event) = events.recv() {
				if let PeerEvent::Message {
					sender, payload, ..
				} = event
					&& let Ok(PeerMessage::Swap(message)) = PeerMessage::decode(&payload)
				{
					router.handle_message(&sender, message);
				}
			}
		});
	}

	TestPeer {
		ledger,
		coordinator,
		outcomes,
		messenger,
	}
}

fn seed_order(
	ledger: &Arc<Mutex<OrderLedger>>,
	account: &str,
	asset: &str,
	side: Side,
	quantity: u64,
	price: u64,
	sequence: u64,
) {
	ledger
		.lock()
		.unwrap()
		.apply(OrderEvent::Announce {
			account: account.to_string(),
			asset: asset.to_string(),
			side,
			quantity,
			price,
			sequence,
			timestamp: 1000,
		})
		.unwrap();
}

fn order(account: &str, asset: &str, side: Side, quantity: u64, price: u64, seq: u64) -> Order {
	Order {
		account: account.to_string(),
		asset: asset.to_string(),
		side,
		quantity,
		price,
		sequence: seq,
		state: OrderState::Open,
		created_at: 1000,
	}
}

async fn next_outcome(peer: &mut TestPeer) -> SessionOutcome {
	tokio::time::timeout(Duration::from_secs(10), peer.outcomes.recv())
		.await
		.expect("timed out waiting for session outcome")
		.expect("outcome channel closed")
}

fn open_quantity(ledger: &Arc<Mutex<OrderLedger>>, account: &str, asset: &str) -> Option<u64> {
	let guard = ledger.lock().unwrap();
	let snapshot = guard.snapshot_of_account(account);
	snapshot.assets.get(asset).map(|orders| {
		orders
			.buys
			.iter()
			.chain(orders.sells.iter())
			.map(|o| o.quantity)
			.sum()
	})
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_swap_settles_both_sides() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	let mut alice = make_peer(&transport, &chain, "alice", true);
	let mut bob = make_peer(&transport, &chain, "bob", true);

	// Alice sells 10 wood at 2, bob buys 10 at 3; both peers know both
	// orders
	for ledger in [&alice.ledger, &bob.ledger] {
		seed_order(ledger, "alice", "wood", Side::Sell, 10, 2, 1);
		seed_order(ledger, "bob", "wood", Side::Buy, 10, 3, 1);
	}

	// Bob spots the candidate and initiates
	let matcher = Matcher::new(bob.ledger.clone());
	let pair = matcher.find_candidates("wood").next().unwrap();
	assert_eq!(pair.quantity, 10);
	// Alice's sell came first: her price executes
	assert_eq!(pair.price, 2);

	bob.coordinator.propose(&pair).unwrap();

	let bob_outcome = next_outcome(&mut bob).await;
	let alice_outcome = next_outcome(&mut alice).await;

	for outcome in [&bob_outcome, &alice_outcome] {
		match outcome {
			SessionOutcome::Settled {
				asset,
				quantity,
				price,
				..
			} => {
				assert_eq!(asset, "wood");
				assert_eq!(*quantity, 10);
				assert_eq!(*price, 2);
			}
			other => panic!("expected settled outcome, got {:?}", other),
		}
	}

	// Both orders are gone from both ledgers
	assert!(alice.ledger.lock().unwrap().is_empty());
	assert!(bob.ledger.lock().unwrap().is_empty());

	// Both chain locks were claimed, none refunded
	assert_eq!(chain.lock_count(), 2);
	assert!(chain.is_claimed("lock-0"));
	assert!(chain.is_claimed("lock-1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_partial_fill_reopens_remainder() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	let mut alice = make_peer(&transport, &chain, "alice", true);
	let mut bob = make_peer(&transport, &chain, "bob", true);

	for ledger in [&alice.ledger, &bob.ledger] {
		seed_order(ledger, "alice", "wood", Side::Sell, 10, 2, 1);
		seed_order(ledger, "bob", "wood", Side::Buy, 4, 3, 1);
	}

	let matcher = Matcher::new(bob.ledger.clone());
	let pair = matcher.find_candidates("wood").next().unwrap();
	assert_eq!(pair.quantity, 4);

	bob.coordinator.propose(&pair).unwrap();

	assert!(matches!(
		next_outcome(&mut bob).await,
		SessionOutcome::Settled { quantity: 4, .. }
	));
	assert!(matches!(
		next_outcome(&mut alice).await,
		SessionOutcome::Settled { quantity: 4, .. }
	));

	// Alice's remainder is open again with its original sequence
	let guard = alice.ledger.lock().unwrap();
	let remainder = guard.get("alice", 1).unwrap();
	assert_eq!(remainder.quantity, 6);
	assert_eq!(remainder.state, OrderState::Open);
	drop(guard);

	// Bob's buy is fully settled
	assert!(bob.ledger.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_response_timeout_releases_order() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	let mut alice = make_peer(&transport, &chain, "alice", true);
	// Bob is connected but nothing processes his inbox
	let _bob = make_peer(&transport, &chain, "bob", false);

	seed_order(&alice.ledger, "alice", "wood", Side::Buy, 5, 3, 1);
	let pair = OrderPair {
		buy: order("alice", "wood", Side::Buy, 5, 3, 1),
		sell: order("bob", "wood", Side::Sell, 5, 2, 7),
		quantity: 5,
		price: 2,
	};

	alice.coordinator.propose(&pair).unwrap();

	match next_outcome(&mut alice).await {
		SessionOutcome::Aborted { error, .. } => {
			assert!(matches!(error, SwapError::ResponseTimeout));
		}
		other => panic!("expected abort, got {:?}", other),
	}

	// The reserved order is open again and nothing reached the chain
	assert_eq!(open_quantity(&alice.ledger, "alice", "wood"), Some(5));
	assert_eq!(chain.lock_count(), 0);
	assert_eq!(alice.coordinator.active_sessions(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_proposal_outside_limit_is_rejected() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	let mut alice = make_peer(&transport, &chain, "alice", true);
	let bob = make_peer(&transport, &chain, "bob", true);

	// Bob's actual sell limit is 5; alice works from a stale view
	// believing it is 2
	seed_order(&alice.ledger, "alice", "wood", Side::Buy, 5, 3, 1);
	seed_order(&bob.ledger, "bob", "wood", Side::Sell, 5, 5, 7);

	let pair = OrderPair {
		buy: order("alice", "wood", Side::Buy, 5, 3, 1),
		sell: order("bob", "wood", Side::Sell, 5, 2, 7),
		quantity: 5,
		price: 2,
	};
	alice.coordinator.propose(&pair).unwrap();

	match next_outcome(&mut alice).await {
		SessionOutcome::Aborted { error, .. } => {
			assert!(matches!(error, SwapError::Rejected(_)));
		}
		other => panic!("expected abort, got {:?}", other),
	}

	// Bob's order is untouched, alice's is released
	assert_eq!(open_quantity(&bob.ledger, "bob", "wood"), Some(5));
	assert_eq!(open_quantity(&alice.ledger, "alice", "wood"), Some(5));
	assert_eq!(chain.lock_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lock_failure_aborts_before_value_at_risk() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	let mut alice = make_peer(&transport, &chain, "alice", true);
	let mut bob = make_peer(&transport, &chain, "bob", true);

	for ledger in [&alice.ledger, &bob.ledger] {
		seed_order(ledger, "alice", "wood", Side::Sell, 10, 2, 1);
		seed_order(ledger, "bob", "wood", Side::Buy, 10, 3, 1);
	}

	chain.set_fail_locks(true);

	let matcher = Matcher::new(bob.ledger.clone());
	let pair = matcher.find_candidates("wood").next().unwrap();
	bob.coordinator.propose(&pair).unwrap();

	// Both sessions abort; both orders come back
	let bob_outcome = next_outcome(&mut bob).await;
	let alice_outcome = next_outcome(&mut alice).await;
	assert!(matches!(bob_outcome, SessionOutcome::Aborted { .. }));
	assert!(matches!(alice_outcome, SessionOutcome::Aborted { .. }));

	assert_eq!(open_quantity(&bob.ledger, "bob", "wood"), Some(10));
	assert_eq!(open_quantity(&alice.ledger, "alice", "wood"), Some(10));
	assert_eq!(chain.lock_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_counter_lock_timeout_refunds() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	let mut alice = make_peer(&transport, &chain, "alice", true);
	// Bob accepts by hand and then goes dark: he never locks
	let bob = transport.connect("bob");

	seed_order(&alice.ledger, "alice", "wood", Side::Buy, 5, 3, 1);
	let pair = OrderPair {
		buy: order("alice", "wood", Side::Buy, 5, 3, 1),
		sell: order("bob", "wood", Side::Sell, 5, 2, 7),
		quantity: 5,
		price: 2,
	};
	alice.coordinator.propose(&pair).unwrap();

	let events = bob.events();
	let accepted = std::thread::spawn(move || {
		while let Ok(event) = events.recv_timeout(Duration::from_secs(5)) {
			if let PeerEvent::Message { payload, .. } = event
				&& let Ok(PeerMessage::Swap(SwapMessage::Propose {
					session,
					asset,
					quantity,
					price,
					..
				})) = PeerMessage::decode(&payload)
			{
				let accept = PeerMessage::Swap(SwapMessage::Accept {
					session,
					asset,
					quantity,
					price,
				});
				bob.publish(&direct_room("alice"), &accept.encode()).unwrap();
				return true;
			}
		}
		false
	});

	match next_outcome(&mut alice).await {
		SessionOutcome::Refunded { error, .. } => {
			assert!(matches!(error, SwapError::CounterLockTimeout));
		}
		other => panic!("expected refund, got {:?}", other),
	}
	assert!(accepted.join().unwrap());

	// Alice's lock was recovered and her order is open again
	assert_eq!(chain.lock_count(), 1);
	assert!(chain.is_refunded("lock-0"));
	assert_eq!(open_quantity(&alice.ledger, "alice", "wood"), Some(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unclaimed_locks_are_refunded() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	let mut alice = make_peer(&transport, &chain, "alice", true);
	let mut bob = make_peer(&transport, &chain, "bob", true);

	for ledger in [&alice.ledger, &bob.ledger] {
		seed_order(ledger, "alice", "wood", Side::Sell, 10, 2, 1);
		seed_order(ledger, "bob", "wood", Side::Buy, 10, 3, 1);
	}

	// Every claim fails: the initiator cannot reveal, so the responder
	// never sees a secret either; both sides must recover their locks
	chain.inject_claim_failures(100);

	let matcher = Matcher::new(bob.ledger.clone());
	let pair = matcher.find_candidates("wood").next().unwrap();
	bob.coordinator.propose(&pair).unwrap();

	let bob_outcome = next_outcome(&mut bob).await;
	let alice_outcome = next_outcome(&mut alice).await;
	assert!(matches!(bob_outcome, SessionOutcome::Refunded { .. }));
	assert!(matches!(alice_outcome, SessionOutcome::Refunded { .. }));

	assert_eq!(chain.lock_count(), 2);
	assert!(chain.is_refunded("lock-0"));
	assert!(chain.is_refunded("lock-1"));
	assert_eq!(open_quantity(&bob.ledger, "bob", "wood"), Some(10));
	assert_eq!(open_quantity(&alice.ledger, "alice", "wood"), Some(10));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_responder_settles_after_own_lock_expiry() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	// The responder checks for the revealed secret so rarely that its
	// own lock expires before it notices the initiator's claim; the
	// revealed secret must still complete the trade on the
	// longer-lived initiator lock
	let config = SwapConfig {
		secret_poll_interval: Duration::from_millis(1000),
		responder_lock_timeout: Duration::from_millis(500),
		initiator_lock_timeout: Duration::from_millis(5000),
		..quick_config()
	};
	let mut alice = make_peer_with(&transport, &chain, "alice", true, config.clone());
	let mut bob = make_peer_with(&transport, &chain, "bob", true, config);

	for ledger in [&alice.ledger, &bob.ledger] {
		seed_order(ledger, "alice", "wood", Side::Sell, 10, 2, 1);
		seed_order(ledger, "bob", "wood", Side::Buy, 10, 3, 1);
	}

	let matcher = Matcher::new(bob.ledger.clone());
	let pair = matcher.find_candidates("wood").next().unwrap();
	bob.coordinator.propose(&pair).unwrap();

	// Whichever way the race falls, the trade must settle both sides
	assert!(matches!(
		next_outcome(&mut bob).await,
		SessionOutcome::Settled { .. }
	));
	assert!(matches!(
		next_outcome(&mut alice).await,
		SessionOutcome::Settled { .. }
	));

	assert_eq!(chain.lock_count(), 2);
	assert!(chain.is_claimed("lock-0"));
	assert!(chain.is_claimed("lock-1"));
	assert!(alice.ledger.lock().unwrap().is_empty());
	assert!(bob.ledger.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stuck_session_is_surfaced() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	let mut alice = make_peer(&transport, &chain, "alice", true);
	let bob = transport.connect("bob");

	seed_order(&alice.ledger, "alice", "wood", Side::Buy, 5, 3, 1);
	let pair = OrderPair {
		buy: order("alice", "wood", Side::Buy, 5, 3, 1),
		sell: order("bob", "wood", Side::Sell, 5, 2, 7),
		quantity: 5,
		price: 2,
	};

	// Refunds stay down for good: the lock is at risk and the session
	// must say so instead of pretending it resolved
	chain.inject_refund_failures(100);
	alice.coordinator.propose(&pair).unwrap();

	let events = bob.events();
	std::thread::spawn(move || {
		while let Ok(event) = events.recv_timeout(Duration::from_secs(5)) {
			if let PeerEvent::Message { payload, .. } = event
				&& let Ok(PeerMessage::Swap(SwapMessage::Propose {
					session,
					asset,
					quantity,
					price,
					..
				})) = PeerMessage::decode(&payload)
			{
				let accept = PeerMessage::Swap(SwapMessage::Accept {
					session,
					asset,
					quantity,
					price,
				});
				let _ = bob.publish(&direct_room("alice"), &accept.encode());
				return;
			}
		}
	});

	match next_outcome(&mut alice).await {
		SessionOutcome::Stuck { error, lock_id, .. } => {
			assert!(matches!(error, SwapError::RefundFailure(_)));
			assert_eq!(lock_id.as_deref(), Some("lock-0"));
		}
		other => panic!("expected stuck session, got {:?}", other),
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_propose_gets_order_unavailable() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	let alice = make_peer(&transport, &chain, "alice", true);
	let _bob = make_peer(&transport, &chain, "bob", false);

	seed_order(&alice.ledger, "alice", "wood", Side::Buy, 5, 3, 1);
	let pair = OrderPair {
		buy: order("alice", "wood", Side::Buy, 5, 3, 1),
		sell: order("bob", "wood", Side::Sell, 5, 2, 7),
		quantity: 5,
		price: 2,
	};

	// Two match passes race for the same order: exactly one session
	alice.coordinator.propose(&pair).unwrap();
	match alice.coordinator.propose(&pair) {
		Err(SwapError::OrderUnavailable { account, sequence }) => {
			assert_eq!(account, "alice");
			assert_eq!(sequence, 1);
		}
		other => panic!("expected OrderUnavailable, got {:?}", other),
	}
	assert_eq!(alice.coordinator.active_sessions(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_local_cancel_before_lock_releases_order() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	let mut alice = make_peer(&transport, &chain, "alice", true);
	let _bob = make_peer(&transport, &chain, "bob", false);

	seed_order(&alice.ledger, "alice", "wood", Side::Buy, 5, 3, 1);
	let pair = OrderPair {
		buy: order("alice", "wood", Side::Buy, 5, 3, 1),
		sell: order("bob", "wood", Side::Sell, 5, 2, 7),
		quantity: 5,
		price: 2,
	};

	let session = alice.coordinator.propose(&pair).unwrap();
	assert!(alice.coordinator.cancel(&session));

	match next_outcome(&mut alice).await {
		SessionOutcome::Aborted { error, .. } => {
			assert!(matches!(error, SwapError::Cancelled));
		}
		other => panic!("expected cancelled abort, got {:?}", other),
	}
	assert_eq!(open_quantity(&alice.ledger, "alice", "wood"), Some(5));
	assert_eq!(chain.lock_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_proposals_one_wins() {
	let transport = MemoryTransport::new();
	let chain = Arc::new(MemoryChain::new());
	let alice = make_peer(&transport, &chain, "alice", false);
	let _bob = transport.connect("bob");
	let carol = transport.connect("carol");

	seed_order(&alice.ledger, "alice", "wood", Side::Sell, 10, 2, 1);

	let propose = |session: &str, seq: u64| SwapMessage::Propose {
		session: session.to_string(),
		asset: "wood".to_string(),
		quantity: 10,
		price: 2,
		commitment: bazaar_sdk::secret::Secret::generate().commitment().to_hex(),
		counter_sequence: 1,
		initiator_sequence: seq,
	};

	// Two counterparties target the same resting order
	alice.coordinator.handle_message("bob", propose("s-bob", 4));
	alice.coordinator.handle_message("carol", propose("s-carol", 9));

	// Exactly one responder session exists; the loser got a reject
	assert_eq!(alice.coordinator.active_sessions(), 1);
	let carol_events = carol.events();
	let rejected = carol_events
		.recv_timeout(Duration::from_secs(2))
		.ok()
		.and_then(|event| match event {
			PeerEvent::Message { payload, .. } => PeerMessage::decode(&payload).ok(),
			_ => None,
		});
	assert!(matches!(
		rejected,
		Some(PeerMessage::Swap(SwapMessage::Reject { .. }))
	));
}
