//! Registry of long-running operations attached to individual items.
//!
//! Lets the UI show that e.g. a branch is being pushed, and lets several
//! items have independent operations in flight at once.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::model::HasUrn;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ItemOperation {
    #[default]
    None,
    Pushing,
    Pulling,
    FastForwarding,
    Deleting,
    Fetching,
    CheckingOut,
}

impl ItemOperation {
    pub fn label(self) -> &'static str {
        match self {
            ItemOperation::None => "",
            ItemOperation::Pushing => "Pushing",
            ItemOperation::Pulling => "Pulling",
            ItemOperation::FastForwarding => "Fast-forwarding",
            ItemOperation::Deleting => "Deleting",
            ItemOperation::Fetching => "Fetching",
            ItemOperation::CheckingOut => "Checking out",
        }
    }
}

/// At most one operation per item URN. Setting an item that already has an
/// operation overwrites it; callers must not start two on the same item.
#[derive(Default)]
pub struct OperationRegistry {
    operations: Mutex<HashMap<String, ItemOperation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, item: &dyn HasUrn) -> ItemOperation {
        self.get_urn(&item.urn())
    }

    pub fn get_urn(&self, urn: &str) -> ItemOperation {
        self.operations
            .lock()
            .get(urn)
            .copied()
            .unwrap_or(ItemOperation::None)
    }

    pub fn set(&self, item: &dyn HasUrn, operation: ItemOperation) {
        self.set_urn(item.urn(), operation);
    }

    pub fn set_urn(&self, urn: String, operation: ItemOperation) {
        let mut operations = self.operations.lock();
        if operation == ItemOperation::None {
            operations.remove(&urn);
        } else {
            operations.insert(urn, operation);
        }
    }

    pub fn clear_urn(&self, urn: &str) {
        self.operations.lock().remove(urn);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.operations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Item(&'static str);

    impl HasUrn for Item {
        fn urn(&self) -> String {
            format!("branch-{}", self.0)
        }
    }

    #[test]
    fn set_then_clear_frees_the_slot() {
        let registry = OperationRegistry::new();
        let main = Item("main");
        registry.set(&main, ItemOperation::Pushing);
        assert_eq!(registry.get(&main), ItemOperation::Pushing);
        registry.clear_urn(&main.urn());
        assert_eq!(registry.get(&main), ItemOperation::None);
        assert!(registry.is_empty());
    }

    #[test]
    fn last_writer_wins_for_the_same_item() {
        let registry = OperationRegistry::new();
        let main = Item("main");
        registry.set(&main, ItemOperation::Pushing);
        registry.set(&main, ItemOperation::Pulling);
        assert_eq!(registry.get(&main), ItemOperation::Pulling);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn setting_none_is_a_clear() {
        let registry = OperationRegistry::new();
        let dev = Item("dev");
        registry.set(&dev, ItemOperation::Fetching);
        registry.set(&dev, ItemOperation::None);
        assert!(registry.is_empty());
    }

    #[test]
    fn different_items_are_independent() {
        let registry = std::sync::Arc::new(OperationRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let urn = format!("branch-b{i}");
                    for _ in 0..200 {
                        registry.set_urn(urn.clone(), ItemOperation::Pushing);
                        assert_eq!(registry.get_urn(&urn), ItemOperation::Pushing);
                        registry.clear_urn(&urn);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(registry.is_empty());
    }

    fn op_strategy() -> impl Strategy<Value = ItemOperation> {
        prop_oneof![
            Just(ItemOperation::None),
            Just(ItemOperation::Pushing),
            Just(ItemOperation::Pulling),
            Just(ItemOperation::FastForwarding),
            Just(ItemOperation::Deleting),
            Just(ItemOperation::Fetching),
            Just(ItemOperation::CheckingOut),
        ]
    }

    proptest! {
        #[test]
        fn registry_matches_a_last_writer_map(
            steps in proptest::collection::vec((0usize..4, op_strategy(), any::<bool>()), 0..64)
        ) {
            let registry = OperationRegistry::new();
            let mut expected: HashMap<String, ItemOperation> = HashMap::new();
            for (item, op, clear) in steps {
                let urn = format!("branch-{item}");
                if clear {
                    registry.clear_urn(&urn);
                    expected.remove(&urn);
                } else {
                    registry.set_urn(urn.clone(), op);
                    if op == ItemOperation::None {
                        expected.remove(&urn);
                    } else {
                        expected.insert(urn, op);
                    }
                }
            }
            prop_assert_eq!(registry.len(), expected.len());
            for item in 0..4 {
                let urn = format!("branch-{item}");
                let want = expected.get(&urn).copied().unwrap_or(ItemOperation::None);
                prop_assert_eq!(registry.get_urn(&urn), want);
            }
        }
    }
}
