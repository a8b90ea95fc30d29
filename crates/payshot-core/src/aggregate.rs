//! Order-based deduplication, totals, materialization and report assembly.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::hashing::HashPartition;
use crate::models::config::ReconcileConfig;
use crate::models::image::{ImageRef, ROOT_FOLDER};
use crate::models::record::{ImageOutcome, OutcomeKind};
use crate::models::report::{
    AmountCheck, BatchReport, DuplicateImageGroup, DuplicateOrderDetail, FailedFile,
    FolderSummary, MaterializationError, OrderDetail, Verdict,
};

/// Successful outcomes sharing one order identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderGroup {
    pub order_number: String,
    /// First outcome seen for this identifier.
    pub canonical: ImageOutcome,
    /// Later outcomes with the same identifier.
    pub duplicates: Vec<ImageOutcome>,
}

impl OrderGroup {
    /// Amount of the canonical record.
    pub fn amount(&self) -> Decimal {
        self.canonical
            .record()
            .and_then(|r| r.amount)
            .unwrap_or_default()
    }
}

/// Group successful outcomes by order identifier, in input order.
///
/// The first outcome seen for an identifier becomes canonical, so callers
/// must pass outcomes in a stable order.
pub fn group_by_order(outcomes: &[ImageOutcome]) -> Vec<OrderGroup> {
    let mut groups: Vec<OrderGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for outcome in outcomes {
        let Some(order_number) = outcome.record().and_then(|r| r.order_number.clone()) else {
            continue;
        };

        match index.get(&order_number) {
            Some(&idx) => {
                debug!(
                    "Duplicate order {}: {} (first seen in {})",
                    order_number, outcome.image.relative_path, groups[idx].canonical.image.relative_path
                );
                groups[idx].duplicates.push(outcome.clone());
            }
            None => {
                index.insert(order_number.clone(), groups.len());
                groups.push(OrderGroup {
                    order_number,
                    canonical: outcome.clone(),
                    duplicates: Vec::new(),
                });
            }
        }
    }

    groups
}

/// Sum of canonical amounts, rounded to two decimal places.
pub fn total_amount(groups: &[OrderGroup]) -> Decimal {
    groups.iter().map(OrderGroup::amount).sum::<Decimal>().round_dp(2)
}

/// A canonical order with its rank and output name.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedOrder {
    /// 1-based rank by amount, descending.
    pub index: usize,
    pub order_number: String,
    pub amount: Decimal,
    pub image: ImageRef,
}

impl RankedOrder {
    /// File name used in the deduplicated output.
    pub fn destination_name(&self) -> String {
        destination_name(self.index, self.amount, self.image.file_name())
    }

    /// Target path under `out_root`, mirroring the source folder.
    pub fn destination(&self, out_root: &Path) -> PathBuf {
        let folder = self.image.folder();
        let dir = if folder == ROOT_FOLDER {
            out_root.to_path_buf()
        } else {
            out_root.join(folder)
        };
        dir.join(self.destination_name())
    }
}

/// Rank canonical records by amount descending, ties by relative path.
pub fn ranked(groups: &[OrderGroup]) -> Vec<RankedOrder> {
    let mut ordered: Vec<&OrderGroup> = groups.iter().collect();
    ordered.sort_by(|a, b| {
        b.amount()
            .cmp(&a.amount())
            .then_with(|| a.canonical.image.relative_path.cmp(&b.canonical.image.relative_path))
    });

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, group)| RankedOrder {
            index: i + 1,
            order_number: group.order_number.clone(),
            amount: group.amount(),
            image: group.canonical.image.clone(),
        })
        .collect()
}

/// `<rank:03>_¥<amount:.2>_<file name>`.
pub fn destination_name(index: usize, amount: Decimal, file_name: &str) -> String {
    format!("{:03}_¥{:.2}_{}", index, amount, file_name)
}

/// Copy every ranked image into `out_root`, preserving its folder.
///
/// Copy failures are collected and never stop the remaining copies.
pub fn materialize(orders: &[RankedOrder], out_root: &Path) -> Vec<MaterializationError> {
    let mut errors = Vec::new();

    for order in orders {
        let destination = order.destination(out_root);
        let result = destination
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::copy(&order.image.path, &destination));

        match result {
            Ok(_) => debug!("Copied {} -> {}", order.image.relative_path, destination.display()),
            Err(e) => {
                warn!("Failed to copy {}: {}", order.image.relative_path, e);
                errors.push(MaterializationError {
                    relative_path: order.image.relative_path.clone(),
                    destination: destination.display().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        "Materialized {} of {} orders into {}",
        orders.len() - errors.len(),
        orders.len(),
        out_root.display()
    );
    errors
}

/// Order counts and amounts per folder label, sorted by label.
pub fn folder_summaries(orders: &[RankedOrder]) -> Vec<FolderSummary> {
    let mut folders: BTreeMap<String, (usize, Decimal)> = BTreeMap::new();
    for order in orders {
        let entry = folders.entry(order.image.folder()).or_default();
        entry.0 += 1;
        entry.1 += order.amount;
    }

    folders
        .into_iter()
        .map(|(folder, (orders, amount))| FolderSummary {
            folder,
            orders,
            amount: amount.round_dp(2),
            check: None,
        })
        .collect()
}

/// Order-level view of a dispatched batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub groups: Vec<OrderGroup>,
    pub ranked: Vec<RankedOrder>,
    pub total_amount: Decimal,
}

impl Aggregation {
    /// Aggregate outcomes already sorted by relative path.
    pub fn from_outcomes(outcomes: &[ImageOutcome]) -> Self {
        let groups = group_by_order(outcomes);
        let ranked = ranked(&groups);
        let total_amount = total_amount(&groups);
        Self {
            groups,
            ranked,
            total_amount,
        }
    }

    pub fn duplicate_order_count(&self) -> usize {
        self.groups.iter().filter(|g| !g.duplicates.is_empty()).count()
    }
}

impl BatchReport {
    /// Assemble the report for one batch.
    pub fn build(
        total_files: usize,
        partition: &HashPartition,
        outcomes: &[ImageOutcome],
        aggregation: &Aggregation,
        materialization_errors: Vec<MaterializationError>,
    ) -> Self {
        let success_count = outcomes.iter().filter(|o| o.is_success()).count();
        let cached_count = outcomes.iter().filter(|o| o.is_cached()).count();

        let orders = aggregation
            .ranked
            .iter()
            .map(|order| OrderDetail {
                index: order.index,
                order_number: order.order_number.clone(),
                amount: order.amount,
                filename: order.image.file_name().to_string(),
                folder: order.image.folder(),
                relative_path: order.image.relative_path.clone(),
                deduped_name: order.destination_name(),
            })
            .collect();

        let duplicates = aggregation
            .groups
            .iter()
            .filter(|g| !g.duplicates.is_empty())
            .map(|g| DuplicateOrderDetail {
                order_number: g.order_number.clone(),
                amount: g.amount(),
                original_file: g.canonical.image.relative_path.clone(),
                duplicate_files: g
                    .duplicates
                    .iter()
                    .map(|d| d.image.relative_path.clone())
                    .collect(),
                duplicate_count: g.duplicates.len(),
            })
            .collect();

        let duplicate_images_list = partition
            .groups
            .iter()
            .map(|g| DuplicateImageGroup {
                hash: g.hash.to_string(),
                files: g.members.iter().map(|m| m.relative_path.clone()).collect(),
                count: g.members.len(),
            })
            .collect();

        let failed_files: Vec<FailedFile> = outcomes.iter().filter_map(failed_file).collect();

        Self {
            total_files,
            success_count,
            failed_count: failed_files.len(),
            cached_count,
            recognized_count: success_count - cached_count,
            hash_failure_count: partition.failures.len(),
            unique_orders: aggregation.groups.len(),
            duplicate_orders: aggregation.duplicate_order_count(),
            duplicate_images: partition.groups.len(),
            total_duplicate_files: partition.grouped_file_count(),
            total_amount: aggregation.total_amount,
            orders,
            duplicates,
            duplicate_images_list,
            failed_files,
            hash_failures: partition.failures.clone(),
            folders: folder_summaries(&aggregation.ranked),
            amount_check: None,
            materialization_errors,
        }
    }

    /// Compare folder totals with the configured expectations. Folders that
    /// are expected but produced no orders are added with a zero total. The
    /// overall check covers only folders with an expectation.
    pub fn reconcile(&mut self, config: &ReconcileConfig) {
        if config.expected_amounts.is_empty() {
            return;
        }

        for folder in config.expected_amounts.keys() {
            if !self.folders.iter().any(|f| &f.folder == folder) {
                self.folders.push(FolderSummary {
                    folder: folder.clone(),
                    orders: 0,
                    amount: Decimal::ZERO,
                    check: None,
                });
            }
        }
        self.folders.sort_by(|a, b| a.folder.cmp(&b.folder));

        let mut recognized = Decimal::ZERO;
        let mut expected = Decimal::ZERO;
        for summary in &mut self.folders {
            let Some(&target) = config.expected_amounts.get(&summary.folder) else {
                continue;
            };
            let check = AmountCheck::new(summary.amount, target, config.close_tolerance);
            if check.verdict != Verdict::Match {
                warn!(
                    "Folder {}: recognized {} but expected {} ({})",
                    summary.folder,
                    summary.amount,
                    target,
                    check.verdict.label()
                );
            }
            recognized += summary.amount;
            expected += target;
            summary.check = Some(check);
        }

        self.amount_check = Some(AmountCheck::new(recognized, expected, config.close_tolerance));
    }
}

fn failed_file(outcome: &ImageOutcome) -> Option<FailedFile> {
    let relative_path = outcome.image.relative_path.clone();
    match &outcome.kind {
        OutcomeKind::Failed {
            order_number,
            amount,
        } => Some(FailedFile {
            relative_path,
            reason: "fields not recognized".to_string(),
            order_number: order_number.clone(),
            amount: *amount,
        }),
        OutcomeKind::Error(error) => Some(FailedFile {
            relative_path,
            reason: error.clone(),
            order_number: None,
            amount: None,
        }),
        OutcomeKind::Cached(_) | OutcomeKind::Recognized(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::DuplicateGroup;
    use crate::models::image::ContentHash;
    use crate::models::record::ExtractionRecord;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;
    use std::time::SystemTime;

    fn image(root: &Path, relative: &str) -> ImageRef {
        ImageRef {
            path: root.join(relative),
            relative_path: relative.to_string(),
            size: 1,
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    fn success(root: &Path, relative: &str, order: &str, amount: &str) -> ImageOutcome {
        let image = image(root, relative);
        let record = ExtractionRecord::new(
            &image,
            Some(order.to_string()),
            Some(Decimal::from_str(amount).unwrap()),
        );
        ImageOutcome::new(image, OutcomeKind::Recognized(record))
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    const A: &str = "100012345678901234567890";
    const B: &str = "420000279120250921795551234";

    #[test]
    fn test_first_seen_wins_canonical() {
        let root = Path::new("/batch");
        let outcomes = vec![
            success(root, "a.jpg", A, "10.00"),
            success(root, "b.jpg", A, "99.00"),
            success(root, "c.jpg", B, "5.00"),
        ];

        let groups = group_by_order(&outcomes);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].canonical.image.relative_path, "a.jpg");
        assert_eq!(groups[0].duplicates.len(), 1);
        assert_eq!(total_amount(&groups), dec("15.00"));
    }

    #[test]
    fn test_failed_outcomes_are_not_grouped() {
        let root = Path::new("/batch");
        let failed = ImageOutcome::new(
            image(root, "x.jpg"),
            OutcomeKind::Failed {
                order_number: Some(A.to_string()),
                amount: None,
            },
        );
        assert!(group_by_order(&[failed]).is_empty());
    }

    #[test]
    fn test_ranking_by_amount_then_path() {
        let root = Path::new("/batch");
        let outcomes = vec![
            success(root, "b.jpg", "200000000000000000000001", "20.00"),
            success(root, "a.jpg", "200000000000000000000002", "20.00"),
            success(root, "c.jpg", "200000000000000000000003", "30.10"),
        ];

        let ranked = ranked(&group_by_order(&outcomes));
        let order: Vec<(usize, &str)> = ranked
            .iter()
            .map(|r| (r.index, r.image.relative_path.as_str()))
            .collect();
        assert_eq!(order, vec![(1, "c.jpg"), (2, "a.jpg"), (3, "b.jpg")]);
    }

    #[test]
    fn test_destination_name_and_path() {
        assert_eq!(destination_name(7, dec("128.5"), "a.jpg"), "007_¥128.50_a.jpg");

        let root = Path::new("/batch");
        let ranked = ranked(&group_by_order(&[
            success(root, "shop/a.jpg", A, "1.00"),
            success(root, "b.jpg", B, "0.50"),
        ]));
        let out = Path::new("/out");
        assert_eq!(ranked[0].destination(out), Path::new("/out/shop/001_¥1.00_a.jpg"));
        assert_eq!(ranked[1].destination(out), Path::new("/out/002_¥0.50_b.jpg"));
    }

    #[test]
    fn test_total_rounds_to_cents() {
        let root = Path::new("/batch");
        let mut first = success(root, "a.jpg", A, "0.10");
        if let OutcomeKind::Recognized(record) = &mut first.kind {
            record.amount = Some(dec("0.105"));
        }
        let groups = group_by_order(&[first, success(root, "b.jpg", B, "0.20")]);
        assert_eq!(total_amount(&groups), dec("0.30"));
    }

    #[test]
    fn test_materialize_copies_and_collects_errors() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("shop")).unwrap();
        std::fs::write(src.path().join("shop/a.jpg"), b"a").unwrap();

        let ranked = ranked(&group_by_order(&[
            success(src.path(), "shop/a.jpg", A, "2.00"),
            success(src.path(), "gone.jpg", B, "1.00"),
        ]));
        let errors = materialize(&ranked, out.path());

        assert!(out.path().join("shop/001_¥2.00_a.jpg").exists());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].relative_path, "gone.jpg");
    }

    #[test]
    fn test_folder_summaries() {
        let root = Path::new("/batch");
        let ranked = ranked(&group_by_order(&[
            success(root, "a.jpg", "300000000000000000000001", "1.00"),
            success(root, "shop/b.jpg", "300000000000000000000002", "2.00"),
            success(root, "shop/c.jpg", "300000000000000000000003", "3.00"),
        ]));
        let folders = folder_summaries(&ranked);
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[0].folder, ROOT_FOLDER);
        assert_eq!(folders[1].folder, "shop");
        assert_eq!(folders[1].orders, 2);
        assert_eq!(folders[1].amount, dec("5.00"));
    }

    #[test]
    fn test_reconcile_against_expected_amounts() {
        let root = Path::new("/batch");
        let outcomes = vec![
            success(root, "a.jpg", "300000000000000000000001", "1.00"),
            success(root, "shop/b.jpg", "300000000000000000000002", "2980.00"),
            success(root, "stall/c.jpg", "300000000000000000000003", "4680.00"),
        ];
        let aggregation = Aggregation::from_outcomes(&outcomes);
        let partition = HashPartition::default();
        let mut report = BatchReport::build(3, &partition, &outcomes, &aggregation, Vec::new());

        let config = ReconcileConfig {
            expected_amounts: [
                ("shop".to_string(), dec("2980")),
                ("stall".to_string(), dec("4700")),
                ("empty".to_string(), dec("6405")),
            ]
            .into_iter()
            .collect(),
            ..ReconcileConfig::default()
        };
        report.reconcile(&config);

        let folders: Vec<&str> = report.folders.iter().map(|f| f.folder.as_str()).collect();
        assert_eq!(folders, vec![ROOT_FOLDER, "empty", "shop", "stall"]);
        assert_eq!(report.folders[0].check, None);

        let verdicts: Vec<(Verdict, Decimal)> = report.folders[1..]
            .iter()
            .map(|f| f.check.as_ref().map(|c| (c.verdict, c.difference)).unwrap())
            .collect();
        assert_eq!(
            verdicts,
            vec![
                (Verdict::LargeGap, dec("-6405")),
                (Verdict::Match, dec("0")),
                (Verdict::Close, dec("-20")),
            ]
        );
        assert_eq!(report.folders[1].orders, 0);

        let overall = report.amount_check.unwrap();
        assert_eq!(overall.recognized, dec("7660.00"));
        assert_eq!(overall.expected, dec("14085"));
        assert_eq!(overall.verdict, Verdict::LargeGap);
    }

    #[test]
    fn test_reconcile_without_expectations_is_noop() {
        let mut report = BatchReport::default();
        report.reconcile(&ReconcileConfig::default());
        assert!(report.folders.is_empty());
        assert_eq!(report.amount_check, None);
    }

    #[test]
    fn test_build_report() {
        let root = Path::new("/batch");
        let dup_image = image(root, "a.jpg");
        let outcomes = vec![
            success(root, "a.jpg", A, "10.00"),
            success(root, "b.jpg", A, "10.00"),
            ImageOutcome::new(
                image(root, "c.jpg"),
                OutcomeKind::Failed {
                    order_number: None,
                    amount: Some(dec("3.00")),
                },
            ),
            ImageOutcome::new(image(root, "d.jpg"), OutcomeKind::Error("gone".to_string())),
        ];
        let partition = HashPartition {
            canonical: Vec::new(),
            groups: vec![DuplicateGroup {
                hash: ContentHash::from_digest(b"x"),
                members: vec![dup_image, image(root, "z.jpg")],
            }],
            failures: Vec::new(),
        };

        let aggregation = Aggregation::from_outcomes(&outcomes);
        let report = BatchReport::build(5, &partition, &outcomes, &aggregation, Vec::new());

        assert_eq!(report.total_files, 5);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.failed_count, 2);
        assert_eq!(report.recognized_count, 2);
        assert_eq!(report.unique_orders, 1);
        assert_eq!(report.duplicate_orders, 1);
        assert_eq!(report.duplicate_images, 1);
        assert_eq!(report.total_duplicate_files, 2);
        assert_eq!(report.total_amount, dec("10.00"));
        assert_eq!(report.orders[0].deduped_name, "001_¥10.00_a.jpg");
        assert_eq!(report.duplicates[0].duplicate_files, vec!["b.jpg".to_string()]);
        assert_eq!(report.failed_files[0].amount, Some(dec("3.00")));
        assert_eq!(report.failed_files[1].reason, "gone");
    }
}
