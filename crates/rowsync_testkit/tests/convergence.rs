//! Property tests: a client that applies every pull patch converges on
//! exactly the rows it may see.

use proptest::prelude::*;
use rowsync_protocol::PatchOperation;
use rowsync_testkit::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

const ORDER_IDS: [&str; 4] = ["o-1", "o-2", "p-0", "p-1"];
const ACCOUNTS: [&str; 2] = ["ba-1", "ba-2"];

#[derive(Debug, Clone)]
enum Op {
    Upsert { order: usize, account: usize },
    Delete { order: usize },
    Assign { account: usize },
    Unassign { account: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..ORDER_IDS.len(), 0..ACCOUNTS.len())
            .prop_map(|(order, account)| Op::Upsert { order, account }),
        (0..ORDER_IDS.len()).prop_map(|order| Op::Delete { order }),
        (0..ACCOUNTS.len()).prop_map(|account| Op::Assign { account }),
        (0..ACCOUNTS.len()).prop_map(|account| Op::Unassign { account }),
    ]
}

fn link_id(account: usize) -> String {
    // bam-1 is the seeded assignment of ba-1 to MANAGER
    if account == 0 {
        "bam-1".to_string()
    } else {
        format!("bam-{MANAGER}-{account}")
    }
}

#[derive(Debug)]
struct Model {
    /// order id -> (account, deleted)
    orders: BTreeMap<String, (usize, bool)>,
    assigned: BTreeSet<usize>,
}

impl Model {
    fn seeded() -> Self {
        let mut orders = BTreeMap::new();
        orders.insert("o-1".to_string(), (0, false));
        orders.insert("o-2".to_string(), (1, false));
        Self {
            orders,
            assigned: BTreeSet::from([0]),
        }
    }

    fn visible_orders(&self) -> BTreeSet<String> {
        self.orders
            .iter()
            .filter(|(_, (account, deleted))| !deleted && self.assigned.contains(account))
            .map(|(id, _)| format!("orders/{id}"))
            .collect()
    }
}

async fn apply_op(ts: &TestServer, model: &mut Model, op: &Op) {
    match *op {
        Op::Upsert { order, account } => {
            let id = ORDER_IDS[order];
            ts.upsert(
                ORDERS,
                id,
                json!({"billingAccountId": ACCOUNTS[account], "customerId": CUSTOMER, "status": "open"}),
            )
            .await;
            model.orders.insert(id.to_string(), (account, false));
        }
        Op::Delete { order } => {
            let id = ORDER_IDS[order];
            ts.soft_delete(ORDERS, id).await;
            if let Some(entry) = model.orders.get_mut(id) {
                entry.1 = true;
            }
        }
        Op::Assign { account } => {
            ts.upsert(
                BILLING_ACCOUNT_MANAGERS,
                &link_id(account),
                json!({"billingAccountId": ACCOUNTS[account], "managerId": MANAGER}),
            )
            .await;
            model.assigned.insert(account);
        }
        Op::Unassign { account } => {
            ts.soft_delete(BILLING_ACCOUNT_MANAGERS, &link_id(account)).await;
            model.assigned.remove(&account);
        }
    }
}

fn apply_patch(cache: &mut BTreeSet<String>, patch: &[PatchOperation]) {
    for op in patch {
        match op {
            PatchOperation::Clear => cache.clear(),
            PatchOperation::Put { key, .. } => {
                cache.insert(key.clone());
            }
            PatchOperation::Del { key } => {
                cache.remove(key);
            }
        }
    }
}

async fn run(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let ts = TestServer::new().await;
    let auth = ts.auth(MANAGER, Role::Manager);
    let group = Uuid::new_v4();
    let mut model = Model::seeded();
    let mut cache = BTreeSet::new();
    let mut cookie = None;

    for op in &ops {
        apply_op(&ts, &mut model, op).await;

        let ok = ts.pull(&auth, group, cookie).await;
        if let Some(previous) = cookie {
            prop_assert!(ok.cookie >= previous);
        }
        cookie = Some(ok.cookie);
        apply_patch(&mut cache, &ok.patch);

        let orders: BTreeSet<String> = cache
            .iter()
            .filter(|k| k.starts_with("orders/"))
            .cloned()
            .collect();
        prop_assert_eq!(orders, model.visible_orders(), "after {:?}", op);
    }

    // Nothing changed since the last pull.
    let ok = ts.pull(&auth, group, cookie).await;
    prop_assert!(ok.patch.is_empty());
    prop_assert_eq!(Some(ok.cookie), cookie);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn manager_cache_converges(ops in prop::collection::vec(op(), 1..12)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(run(ops))?;
    }
}
