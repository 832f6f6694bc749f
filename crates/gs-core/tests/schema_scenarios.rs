//! End-to-end sample/ancestor scenarios and the inference-eligibility law.

use gs_core::{
    expand_haplotype, is_inference_site, AncestorData, Error, SampleData, SiteFilter,
    StoreOptions, UNKNOWN_ALLELE,
};
use proptest::prelude::*;
use tempfile::TempDir;

fn options(chunk_size: usize, threads: usize) -> StoreOptions {
    StoreOptions::default()
        .with_chunk_size(chunk_size)
        .with_flush_threads(threads)
}

/// Sample data with `num_inference_sites` sites where exactly one of two
/// samples carries the derived allele.
fn eight_site_input(dir: Option<&TempDir>) -> SampleData {
    let path = dir.map(|d| d.path().join("samples.gs"));
    let mut data = SampleData::initialise_with_samples(path.as_deref(), 100.0, 2, options(3, 0)).unwrap();
    for site in 0..8 {
        data.add_site(site as f64, &["C", "T"], &[1, 0], None).unwrap();
    }
    data.add_site(50.0, &["C", "T"], &[1, 1], None).unwrap();
    data.finalise().unwrap();
    data
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A site is flagged for inference iff 0 < derived count < num_samples.
    #[test]
    fn inference_flag_follows_derived_count(
        matrix in (1usize..7).prop_flat_map(|n| {
            prop::collection::vec(prop::collection::vec(0u8..2, n), 0..25)
        }),
        threads in prop::sample::select(vec![0usize, 2]),
    ) {
        let num_samples = matrix.first().map_or(1, Vec::len);
        let mut data = SampleData::initialise_with_samples(None, 0.0, num_samples, options(4, threads)).unwrap();
        for (site, genotypes) in matrix.iter().enumerate() {
            data.add_site(site as f64, &["A", "T"], genotypes, None).unwrap();
        }
        data.finalise().unwrap();

        let expected: Vec<bool> = matrix
            .iter()
            .map(|g| is_inference_site(g.iter().filter(|&&v| v == 1).count(), num_samples))
            .collect();
        let flags = data.site_inference().unwrap();
        prop_assert_eq!(&flags, &expected);
        prop_assert_eq!(
            data.num_inference_sites().unwrap(),
            expected.iter().filter(|&&f| f).count()
        );

        let inference_rows: Vec<usize> = data
            .genotypes(SiteFilter::Inference)
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        let expected_rows: Vec<usize> = (0..expected.len()).filter(|&i| expected[i]).collect();
        prop_assert_eq!(inference_rows, expected_rows);

        for (sample, haplotype) in data.haplotypes().unwrap().map(Result::unwrap) {
            let column: Vec<u8> = matrix
                .iter()
                .zip(&expected)
                .filter(|(_, &flag)| flag)
                .map(|(g, _)| g[sample])
                .collect();
            prop_assert_eq!(haplotype, column);
        }
    }
}

#[test]
fn ancestor_slice_round_trip() {
    let input = eight_site_input(None);
    assert_eq!(input.num_sites(), 9);
    assert_eq!(input.num_inference_sites().unwrap(), 8);

    let mut ancestors = AncestorData::initialise(&input, None, options(2, 2)).unwrap();
    assert_eq!(ancestors.num_sites(), 8);
    ancestors.add_ancestor(2, 5, 1.0, &[3], &[1, 1, 0]).unwrap();
    ancestors.finalise().unwrap();

    let stored: Vec<Vec<u8>> = ancestors.ancestors().unwrap().map(Result::unwrap).collect();
    assert_eq!(stored, vec![vec![1, 1, 0]]);
    let u = UNKNOWN_ALLELE;
    assert_eq!(
        expand_haplotype(2, &stored[0], ancestors.num_sites()),
        vec![u, u, 1, 1, 0, u, u, u]
    );
    // Restartable.
    assert_eq!(ancestors.ancestors().unwrap().count(), 1);
}

#[test]
fn sample_rejection_scenarios() {
    let mut data = SampleData::initialise_with_samples(None, 100.0, 2, options(4, 0)).unwrap();
    assert!(matches!(
        data.add_site(-1.0, &["A", "T"], &[0, 1], None),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        data.add_site(1.0, &["A", "T", "G"], &[0, 1], None),
        Err(Error::Validation(_))
    ));
    data.add_site(1.0, &["A", "T"], &[0, 1], None).unwrap();
    assert_eq!(data.num_sites(), 1);
}

#[test]
fn ancestor_rejects_inverted_interval() {
    let input = eight_site_input(None);
    let mut ancestors = AncestorData::initialise(&input, None, options(4, 0)).unwrap();
    assert!(matches!(
        ancestors.add_ancestor(5, 2, 1.0, &[], &[]),
        Err(Error::Validation(_))
    ));
    assert_eq!(ancestors.num_ancestors(), 0);
}

#[test]
fn provenance_survives_finalize_and_reload() {
    let dir = TempDir::new().unwrap();
    let input = eight_site_input(Some(&dir));
    let ancestors_path = dir.path().join("ancestors.gs");
    let mut ancestors = AncestorData::initialise(&input, Some(&ancestors_path), options(2, 1)).unwrap();
    for start in 0..4 {
        ancestors
            .add_ancestor(start, start + 4, 10.0 - start as f64, &[start], &[1, 0, 0, 0])
            .unwrap();
    }
    ancestors.finalise().unwrap();

    let reloaded_input = SampleData::load(&dir.path().join("samples.gs")).unwrap();
    let reloaded = AncestorData::load(&ancestors_path).unwrap();
    assert_eq!(reloaded.sample_data_uuid(), input.uuid());
    reloaded.check_provenance(&reloaded_input).unwrap();
    assert!(reloaded == ancestors);
    assert_eq!(reloaded.time().unwrap(), vec![10.0, 9.0, 8.0, 7.0]);

    let unrelated = eight_site_input(None);
    assert!(matches!(
        reloaded.check_provenance(&unrelated),
        Err(Error::Provenance { .. })
    ));
}
