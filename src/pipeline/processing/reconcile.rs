use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use idmapper_core::{MapperError, MatchRecord, MatchType, ReconciledRecord, Result};

/// Classify every match record by the multiplicity of its source and target.
///
/// Only records carrying both a source and a target id count towards
/// multiplicity; everything else comes back with all flags cleared. Among the
/// records eligible to be canonical for one source, exactly one is chosen:
/// highest confidence, then smallest target id, then earliest position.
pub fn reconcile(records: &[MatchRecord]) -> Result<Vec<ReconciledRecord>> {
    for (position, record) in records.iter().enumerate() {
        check_record(position, record)?;
    }

    // Multiplicity counts distinct partners, not records: a repeated identical
    // pair stays one-to-one so it can still yield its single canonical row.
    let mut sources_per_target: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    let mut targets_per_source: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for (source, target) in records.iter().filter_map(pair) {
        sources_per_target.entry(target).or_default().insert(source);
        targets_per_source.entry(source).or_default().insert(target);
    }

    let mut reconciled: Vec<ReconciledRecord> = records
        .iter()
        .map(|record| {
            let mut out = ReconciledRecord::unflagged(record.clone());
            if let Some((source, target)) = pair(record) {
                out.is_one_to_many_target = sources_per_target.get(target).map_or(0, BTreeSet::len) > 1;
                out.is_one_to_many_source = targets_per_source.get(source).map_or(0, BTreeSet::len) > 1;
            }
            out
        })
        .collect();

    let mut best: HashMap<&str, usize> = HashMap::new();
    for (position, out) in reconciled.iter().enumerate() {
        if out.is_one_to_many_source || out.is_one_to_many_target {
            continue;
        }
        let Some((source, _)) = pair(&records[position]) else {
            continue;
        };
        match best.get(source) {
            Some(&current) if !outranks(&records[position], &records[current]) => {}
            _ => {
                best.insert(source, position);
            }
        }
    }
    for position in best.into_values() {
        reconciled[position].is_canonical = true;
    }

    Ok(reconciled)
}

fn pair(record: &MatchRecord) -> Option<(&str, &str)> {
    Some((record.source_id.as_deref()?, record.target_id.as_deref()?))
}

/// Strictly better canonical candidate. Earlier rows win exact ties.
fn outranks(candidate: &MatchRecord, current: &MatchRecord) -> bool {
    match candidate.confidence.partial_cmp(&current.confidence) {
        Some(Ordering::Greater) => true,
        Some(Ordering::Less) => false,
        _ => candidate.target_id < current.target_id,
    }
}

fn check_record(position: usize, record: &MatchRecord) -> Result<()> {
    let fail = |reason: &str| Err(MapperError::integrity(format!("match record {}: {}", position, reason)));

    if record.source_id.as_deref() == Some("") {
        return fail("empty source_id");
    }
    if record.target_id.as_deref() == Some("") {
        return fail("empty target_id");
    }
    if !(0.0..=1.0).contains(&record.confidence) {
        return fail(&format!("confidence {} outside [0, 1]", record.confidence));
    }
    match (record.match_type, record.target_id.is_some()) {
        (MatchType::Unmatched, true) => fail("unmatched record carries a target_id"),
        (MatchType::Direct | MatchType::Composite | MatchType::ExternalResolved, false) => {
            fail("matched record has no target_id")
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idmapper_core::ErrorKind;

    fn direct(source: &str, target: &str, confidence: f64) -> MatchRecord {
        MatchRecord::matched(source, target, MatchType::Direct, confidence, None)
    }

    #[test]
    fn test_many_sources_to_one_target() {
        let out = reconcile(&[direct("X1", "T1", 1.0), direct("X2", "T1", 1.0)]).unwrap();

        for record in &out {
            assert!(record.is_one_to_many_target);
            assert!(!record.is_one_to_many_source);
            assert!(!record.is_canonical);
        }
    }

    #[test]
    fn test_one_source_to_many_targets() {
        let out = reconcile(&[direct("X1", "T1", 1.0), direct("X1", "T2", 0.9)]).unwrap();

        assert!(out.iter().all(|r| r.is_one_to_many_source && !r.is_canonical));
        assert!(out.iter().all(|r| !r.is_one_to_many_target));
    }

    #[test]
    fn test_null_target_excluded_from_multiplicity() {
        let out = reconcile(&[MatchRecord::unmatched("X3"), direct("X4", "T1", 1.0)]).unwrap();

        assert_eq!(out[0], ReconciledRecord::unflagged(MatchRecord::unmatched("X3")));
        assert!(out[1].is_canonical);
        assert!(!out[1].is_one_to_many_source);
    }

    #[test]
    fn test_duplicate_pairs_get_one_canonical() {
        let composite = MatchRecord::matched("X1", "T1", MatchType::Composite, 0.85, None);
        let out = reconcile(&[composite, direct("X1", "T1", 1.0), direct("X1", "T1", 1.0)]).unwrap();

        let canonical: Vec<usize> = out.iter().enumerate().filter(|(_, r)| r.is_canonical).map(|(i, _)| i).collect();
        assert_eq!(canonical, vec![1]);
        assert!(out.iter().all(|r| !r.is_one_to_many_source && !r.is_one_to_many_target));
    }

    #[test]
    fn test_reconcile_is_deterministic_across_orderings() {
        let a = MatchRecord::matched("X1", "T1", MatchType::Composite, 0.85, None);
        let b = direct("X1", "T1", 1.0);
        let forward = reconcile(&[a.clone(), b.clone()]).unwrap();
        let backward = reconcile(&[b, a]).unwrap();

        let pick = |out: &[ReconciledRecord]| out.iter().find(|r| r.is_canonical).map(|r| r.record.clone());
        assert_eq!(pick(&forward), pick(&backward));
        assert_eq!(pick(&forward).unwrap().match_type, MatchType::Direct);
    }

    #[test]
    fn test_empty_id_is_integrity_error() {
        let err = reconcile(&[direct("", "T1", 1.0)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);
    }

    #[test]
    fn test_out_of_range_confidence_is_integrity_error() {
        assert!(reconcile(&[direct("X", "T", 1.2)]).is_err());
        assert!(reconcile(&[direct("X", "T", f64::NAN)]).is_err());
    }

    #[test]
    fn test_inconsistent_match_type_is_integrity_error() {
        let mut record = MatchRecord::unmatched("X");
        record.target_id = Some("T".to_string());
        assert_eq!(reconcile(&[record]).unwrap_err().kind(), ErrorKind::DataIntegrity);
    }

    #[test]
    fn test_empty_input() {
        assert!(reconcile(&[]).unwrap().is_empty());
    }
}
