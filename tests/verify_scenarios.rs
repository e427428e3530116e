//! # Verification Scenario Tests
//!
//! End-to-end runs of the structural verifier over small on-disk trees:
//! known-good shapes that must pass, and targeted mutations of a known-good
//! three-page tree (descriptor at 0, root internal at 1, leaves at 2 and 3)
//! that must each fail with the matching finding.

mod common;

use std::cell::Cell;
use std::sync::Arc;

use birchdb::btree::{ItemType, OffRef, OvflRef};
use birchdb::config::LEAF_LEVEL;
use birchdb::{DbConfig, FindingKind, VerifyOptions};
use common::TreeBuilder;
use zerocopy::IntoBytes;

fn three_page_tree() -> TreeBuilder {
    let mut b = TreeBuilder::new();
    b.desc(&DbConfig::default(), 1, 512);
    b.row_internal(
        1,
        2,
        &[
            ("a", OffRef::new(2, 2, 512)),
            ("c", OffRef::new(2, 3, 512)),
        ],
    );
    b.row_leaf(2, &[("a", "1"), ("b", "2")]);
    b.row_leaf(3, &[("c", "3"), ("d", "4")]);
    b
}

mod known_good_trees {
    use super::*;

    #[test]
    fn three_page_row_tree_verifies() {
        let (_dir, db) = three_page_tree().open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
        assert_eq!(report.pages_visited, 4);
    }

    #[test]
    fn tree_of_height_one_verifies() {
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 1, 512);
        b.row_leaf(1, &[("a", "1"), ("b", "2")]);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
        assert_eq!(report.pages_visited, 2);
    }

    #[test]
    fn row_leaf_with_one_duplicate_subtree_verifies() {
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 1, 512);
        b.items_page(
            1,
            birchdb::btree::PageType::RowLeaf,
            LEAF_LEVEL,
            0,
            2,
            &[
                (ItemType::Key, b"k".to_vec()),
                (ItemType::Off, OffRef::new(2, 2, 512).as_bytes().to_vec()),
            ],
        );
        b.dup_leaf(2, &["x", "y"]);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
        assert_eq!(report.pages_visited, 3);
    }

    #[test]
    fn two_level_duplicate_subtree_verifies() {
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 1, 512);
        b.items_page(
            1,
            birchdb::btree::PageType::RowLeaf,
            LEAF_LEVEL,
            0,
            2,
            &[
                (ItemType::Key, b"k".to_vec()),
                (ItemType::Off, OffRef::new(2, 2, 512).as_bytes().to_vec()),
            ],
        );
        b.dup_internal(2, 2, &[("x", OffRef::new(2, 3, 512))]);
        b.dup_leaf(3, &["x", "y"]);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
        assert_eq!(report.pages_visited, 4);
    }

    #[test]
    fn column_tree_with_contiguous_recnos_verifies() {
        let config = DbConfig {
            fixed_len: 4,
            ..DbConfig::default()
        };
        let mut b = TreeBuilder::new();
        b.desc(&config, 1, 512);
        b.col_internal(
            1,
            2,
            1,
            &[OffRef::new(3, 2, 512), OffRef::new(2, 3, 512)],
        );
        b.col_fix(2, 1, &[vec![0x10; 4], vec![0x20; 4], vec![0x30; 4]]);
        b.col_fix(3, 4, &[vec![0x40; 4], vec![0x50; 4]]);
        let (_dir, db) = b.open(config);

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
    }

    #[test]
    fn empty_rcc_root_verifies() {
        let config = DbConfig {
            fixed_len: 4,
            repeat_compression: true,
            ..DbConfig::default()
        };
        let mut b = TreeBuilder::new();
        b.desc(&config, 1, 512);
        b.col_rcc(1, 1, &[]);
        let (_dir, db) = b.open(config);

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
    }

    #[test]
    fn single_entry_rcc_with_count_one_verifies() {
        let config = DbConfig {
            fixed_len: 4,
            repeat_compression: true,
            ..DbConfig::default()
        };
        let mut b = TreeBuilder::new();
        b.desc(&config, 1, 512);
        b.col_rcc(1, 1, &[(1, vec![0x42; 4])]);
        let (_dir, db) = b.open(config);

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
    }

    #[test]
    fn overflow_record_filling_its_page_exactly_verifies() {
        let payload = vec![0x55u8; 448]; // 448 + 64-byte header = one unit
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 1, 512);
        b.items_page(
            1,
            birchdb::btree::PageType::RowLeaf,
            LEAF_LEVEL,
            0,
            1,
            &[
                (
                    ItemType::KeyOvfl,
                    OvflRef::new(2, 448).as_bytes().to_vec(),
                ),
                (ItemType::Data, b"v".to_vec()),
            ],
        );
        b.overflow(2, &payload);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
        assert_eq!(report.pages_visited, 3);
    }

    #[test]
    fn verification_repins_transparently_after_relocation() {
        let (_dir, db) = three_page_tree().open(DbConfig::default());
        assert!(db.verify(VerifyOptions::default()).unwrap().success);

        db.debug_mark_relocated(1);
        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
    }

    #[test]
    fn progress_callback_sees_the_final_page_count() {
        let (_dir, db) = three_page_tree().open(DbConfig::default());
        let last = Cell::new(0u64);
        let calls = Cell::new(0u32);

        let report = db
            .verify(VerifyOptions {
                progress: Some(Box::new(|name, count| {
                    assert_eq!(name, "verify.db");
                    last.set(count);
                    calls.set(calls.get() + 1);
                })),
                dump: None,
            })
            .unwrap();

        assert!(report.success);
        assert!(calls.get() >= 1);
        assert_eq!(last.get(), report.pages_visited);
    }

    #[test]
    fn dump_stream_describes_every_page() {
        let (_dir, db) = three_page_tree().open(DbConfig::default());
        let mut out = Vec::new();

        let report = db
            .verify(VerifyOptions {
                progress: None,
                dump: Some(&mut out),
            })
            .unwrap();

        assert!(report.success);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("descriptor"));
        assert!(text.contains("row-internal"));
        assert!(text.contains("row-leaf"));
    }
}

mod in_page_ordering {
    use super::*;

    #[test]
    fn misordered_leaf_keys_are_reported() {
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 1, 512);
        b.row_internal(
            1,
            2,
            &[
                ("a", OffRef::new(2, 2, 512)),
                ("c", OffRef::new(2, 3, 512)),
            ],
        );
        b.row_leaf(2, &[("b", "1"), ("a", "2")]);
        b.row_leaf(3, &[("c", "3"), ("d", "4")]);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::MisorderedItems);
        assert!(report.findings[0].message.contains("page at addr 2"));
    }
}

mod boundary_checks {
    use super::*;

    #[test]
    fn first_key_below_its_routing_key_is_reported() {
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 1, 512);
        b.row_internal(
            1,
            2,
            &[
                ("a", OffRef::new(2, 2, 512)),
                ("b", OffRef::new(2, 3, 512)),
            ],
        );
        b.row_leaf(2, &[("a", "1"), ("aa", "2")]);
        // First key "a" sorts before the routing key "b" that leads here.
        b.row_leaf(3, &[("a", "3"), ("d", "4")]);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::BoundaryViolation);
        assert!(report.findings[0]
            .message
            .contains("first key on page at addr 3 sorts before"));
    }

    #[test]
    fn last_leaf_key_at_or_above_the_next_routing_key_is_reported() {
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 1, 512);
        b.row_internal(
            1,
            2,
            &[
                ("a", OffRef::new(2, 2, 512)),
                ("c", OffRef::new(2, 3, 512)),
            ],
        );
        // Last key "c" collides with the routing key of the next subtree.
        b.row_leaf(2, &[("a", "1"), ("c", "2")]);
        b.row_leaf(3, &[("c", "3"), ("d", "4")]);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::BoundaryViolation);
        assert!(report.findings[0]
            .message
            .contains("last key on page at addr 2 sorts after"));
    }
}

mod coverage {
    use super::*;

    #[test]
    fn unreferenced_page_is_missing_coverage() {
        let mut b = three_page_tree();
        b.pad_to(5); // an extra unit nothing references
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::MissingCoverage);
        assert!(report.findings[0].message.contains("fragment 4"));
    }

    #[test]
    fn page_referenced_twice_is_duplicate_coverage() {
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 1, 512);
        b.row_internal(
            1,
            2,
            &[
                ("a", OffRef::new(2, 2, 512)),
                ("c", OffRef::new(2, 2, 512)),
            ],
        );
        b.row_leaf(2, &[("a", "1"), ("b", "2")]);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::DuplicateCoverage);
        assert!(report.findings[0].message.contains("addr 2"));
    }
}

mod overflow_pages {
    use super::*;

    #[test]
    fn reference_size_disagreeing_with_the_page_is_reported() {
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 1, 512);
        b.items_page(
            1,
            birchdb::btree::PageType::RowLeaf,
            LEAF_LEVEL,
            0,
            1,
            &[
                (
                    ItemType::KeyOvfl,
                    // The reference claims 512 bytes; the page stores 480.
                    OvflRef::new(2, 512).as_bytes().to_vec(),
                ),
                (ItemType::Data, b"v".to_vec()),
            ],
        );
        b.overflow(2, &vec![0x55u8; 480]);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::OverflowSizeMismatch);
    }
}

mod column_stores {
    use super::*;

    #[test]
    fn adjacent_identical_rcc_entries_are_missed_compression() {
        let config = DbConfig {
            fixed_len: 4,
            repeat_compression: true,
            ..DbConfig::default()
        };
        let mut b = TreeBuilder::new();
        b.desc(&config, 1, 512);
        b.col_rcc(1, 1, &[(1, vec![0x42; 4]), (1, vec![0x42; 4])]);
        let (_dir, db) = b.open(config);

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::BadRccCount);
        assert!(report.findings[0]
            .message
            .contains("entries 1 and 2 on page at addr 1"));
    }

    #[test]
    fn column_sibling_with_the_wrong_start_recno_is_reported() {
        let config = DbConfig {
            fixed_len: 4,
            ..DbConfig::default()
        };
        let mut b = TreeBuilder::new();
        b.desc(&config, 1, 512);
        b.col_internal(
            1,
            2,
            1,
            &[OffRef::new(3, 2, 512), OffRef::new(2, 3, 512)],
        );
        b.col_fix(2, 1, &[vec![0x10; 4], vec![0x20; 4], vec![0x30; 4]]);
        b.col_fix(3, 5, &[vec![0x40; 4], vec![0x50; 4]]); // should start at 4
        let (_dir, db) = b.open(config);

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::StartRecnoMismatch);
        assert!(report.findings[0].message.contains("page at addr 3"));
    }
}

mod descriptor {
    use super::*;
    use birchdb::btree::DescRecord;

    #[test]
    fn descriptor_disagreeing_with_the_handle_is_reported() {
        let config = DbConfig {
            leafmax: 4096,
            ..DbConfig::default()
        };
        let mut b = TreeBuilder::new();
        b.desc_record(DescRecord::new(
            config.intlmin,
            config.intlmax,
            config.leafmin,
            8192, // handle is configured with 4096
            0,
            0,
            1,
            512,
        ));
        b.row_leaf(1, &[("a", "1")]);
        let (_dir, db) = b.open(config);

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::DescriptorMismatch);
        assert!(report.findings[0].message.contains("8192"));
    }

    #[test]
    fn descriptor_claiming_a_zero_size_root_is_rejected() {
        // A corrupt descriptor pointing at a zero-size root must not make
        // the file verify as an empty tree.
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 0, 0);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::BadHeader);
        assert!(report.findings[0].message.contains("zero size"));
    }
}

mod tree_structure {
    use super::*;

    #[test]
    fn child_at_the_wrong_level_is_reported() {
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 1, 512);
        // The root claims level 3, so its children must be level 2; the
        // leaves are level 1.
        b.row_internal(
            1,
            3,
            &[
                ("a", OffRef::new(2, 2, 512)),
                ("c", OffRef::new(2, 3, 512)),
            ],
        );
        b.row_leaf(2, &[("a", "1"), ("b", "2")]);
        b.row_leaf(3, &[("c", "3"), ("d", "4")]);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::LevelMismatch);
    }

    #[test]
    fn record_count_disagreeing_with_the_parent_is_reported() {
        let mut b = TreeBuilder::new();
        b.desc(&DbConfig::default(), 1, 512);
        b.row_internal(
            1,
            2,
            &[
                ("a", OffRef::new(3, 2, 512)), // leaf holds 2 records
                ("c", OffRef::new(2, 3, 512)),
            ],
        );
        b.row_leaf(2, &[("a", "1"), ("b", "2")]);
        b.row_leaf(3, &[("c", "3"), ("d", "4")]);
        let (_dir, db) = b.open(DbConfig::default());

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(!report.success);
        assert_eq!(report.findings[0].kind, FindingKind::RecordCountMismatch);
        assert!(report.findings[0].message.contains("page at addr 2"));
    }
}

mod comparators {
    use super::*;

    #[test]
    fn duplicate_values_use_the_duplicate_comparator() {
        let config = DbConfig {
            dup_comparator: Arc::new(|a: &[u8], b: &[u8]| b.cmp(a)),
            ..DbConfig::default()
        };
        let mut b = TreeBuilder::new();
        b.desc(&config, 1, 512);
        b.items_page(
            1,
            birchdb::btree::PageType::RowLeaf,
            LEAF_LEVEL,
            0,
            2,
            &[
                (ItemType::Key, b"k".to_vec()),
                (ItemType::Off, OffRef::new(2, 2, 512).as_bytes().to_vec()),
            ],
        );
        // Descending raw order, which the reversed comparator accepts.
        b.dup_leaf(2, &["y", "x"]);
        let (_dir, db) = b.open(config);

        let report = db.verify(VerifyOptions::default()).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
    }
}
