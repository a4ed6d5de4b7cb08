mod common;

use tempfile::tempdir;

use collate_core::config::BYTES_PER_MB;
use collate_core::inventory::{diff, GroupId, Item, ItemId, Snapshot};
use collate_core::plan::{plan, PlanStore};

use common::{file, text};

fn pdf_mb(id: &str, mb: u64) -> Item {
    file(id, &format!("Acme/{id}.pdf"), mb * BYTES_PER_MB, "application/pdf")
}

fn layout(items: &[Item], ceiling: u64) -> Vec<Vec<String>> {
    let refs: Vec<&Item> = items.iter().collect();
    plan(&GroupId::new("Acme"), &refs, ceiling, "d")
        .unwrap()
        .batches
        .iter()
        .map(|batch| batch.tasks.iter().map(|t| t.id().to_string()).collect())
        .collect()
}

#[test]
fn test_greedy_packing_scenario() {
    let items = [pdf_mb("a", 80), pdf_mb("b", 90), pdf_mb("c", 40)];
    assert_eq!(
        layout(&items, 150 * BYTES_PER_MB),
        vec![vec!["a".to_string()], vec!["b".to_string(), "c".to_string()]]
    );
}

#[test]
fn test_packing_invariant_over_mixed_sizes() {
    let ceiling = 150 * BYTES_PER_MB;
    let sizes = [5, 149, 1, 151, 70, 70, 10, 300, 0, 75, 75, 1];
    let items: Vec<Item> = sizes
        .iter()
        .enumerate()
        .map(|(i, mb)| pdf_mb(&format!("{i:02}"), *mb))
        .collect();
    let refs: Vec<&Item> = items.iter().collect();
    let plan = plan(&GroupId::new("Acme"), &refs, ceiling, "d").unwrap();

    for batch in &plan.batches {
        assert!(
            batch.total_size <= ceiling || batch.tasks.len() == 1,
            "batch {} holds {} bytes in {} tasks",
            batch.index,
            batch.total_size,
            batch.tasks.len()
        );
        assert_eq!(batch.total_size, batch.tasks.iter().map(|t| t.estimated_size).sum::<u64>());
    }

    // Every task exactly once, in canonical order
    let flattened: Vec<&str> = plan.tasks().map(|t| t.id().as_str()).collect();
    let mut expected: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    expected.sort();
    assert_eq!(flattened, expected);

    let indexes: Vec<usize> = plan.batches.iter().map(|b| b.index).collect();
    assert_eq!(indexes, (0..plan.batches.len()).collect::<Vec<_>>());
}

#[test]
fn test_replacing_an_item_at_the_same_path() {
    let previous = Snapshot::new("relative-path", vec![text("x", "Acme/report.txt", 1)]);
    let current = Snapshot::new("relative-path", vec![text("y", "Acme/report.txt", 1)]);

    let changes = diff(Some(&previous), &current).unwrap();
    assert_eq!(changes.removed, vec![ItemId::new("x")]);
    assert_eq!(changes.added.len(), 1);
    assert_eq!(changes.added[0].id, ItemId::new("y"));
    assert!(changes.modified.is_empty());
}

#[test]
fn test_same_inputs_store_once() {
    let dir = tempdir().unwrap();
    let store = PlanStore::new(dir.path());
    let items = [pdf_mb("a", 80), pdf_mb("b", 90), pdf_mb("c", 40)];
    let refs: Vec<&Item> = items.iter().collect();

    let first = plan(&GroupId::new("Acme"), &refs, 150 * BYTES_PER_MB, "d").unwrap();
    let second = plan(&GroupId::new("Acme"), &refs, 150 * BYTES_PER_MB, "d").unwrap();
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.batches, second.batches);

    assert!(store.save(&first).unwrap());
    assert!(!store.has_changed(&GroupId::new("Acme"), &second).unwrap());
    assert!(!store.save(&second).unwrap());
}
