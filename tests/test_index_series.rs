use approx::assert_abs_diff_eq;
use ltstack::core::{
    build_lt_collection, compute_index, mean_std, resolve_window, standardize_index, LtIndexSpec, SpectralIndex,
};
use ltstack::{BandStack, ImageCollection, LtError, RasterImage, ValidityMask, COMPOSITE_BANDS};

fn composite(b4: f32, b7: f32) -> RasterImage {
    RasterImage::constant(&COMPOSITE_BANDS, &[300.0, 450.0, 400.0, b4, 1800.0, b7], (1, 1)).unwrap()
}

/// Four-year stack over a 2x3 grid with a different trajectory per pixel
fn varying_stack() -> ImageCollection {
    (0..4)
        .map(|t| {
            let data = BandStack::from_shape_fn((6, 2, 3), |(b, r, c)| {
                let base = [300.0, 450.0, 400.0, 2500.0, 1800.0, 900.0][b];
                base + (t * (r * 3 + c + 1) * 37 % 400) as f32 - 50.0 * b as f32 * t as f32
            });
            let names = COMPOSITE_BANDS.iter().map(|b| b.to_string()).collect();
            RasterImage::new(names, data, ValidityMask::from_elem((2, 3), true)).unwrap()
        })
        .collect()
}

#[test]
fn test_nbr_literal_example() {
    let image = composite(500.0, 300.0);
    let nbr = compute_index(&image, SpectralIndex::Nbr, false).unwrap();
    assert_abs_diff_eq!(nbr.band("NBR").unwrap()[[0, 0]], 250.0, epsilon = 1e-3);
    let flipped = compute_index(&image, SpectralIndex::Nbr, true).unwrap();
    assert_abs_diff_eq!(flipped.band("NBR").unwrap()[[0, 0]], -250.0, epsilon = 1e-3);
}

#[test]
fn test_standardized_series_has_zero_mean_unit_std() {
    let stack = varying_stack();
    for index in [SpectralIndex::Nbr, SpectralIndex::Tcw, SpectralIndex::B5] {
        let z = standardize_index(&stack, index).unwrap();
        for r in 0..2 {
            for c in 0..3 {
                let series: Vec<f64> = z.iter().map(|img| img.data()[[0, r, c]] as f64 / 1000.0).collect();
                let (mean, std) = mean_std(&series).unwrap();
                assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-4);
                assert_abs_diff_eq!(std, 1.0, epsilon = 1e-4);
            }
        }
    }
}

#[test]
fn test_ensemble_series_named_by_code() {
    let stack = varying_stack();
    for code in ["TCM", "ENC", "ENS1", "NBRz"] {
        let kind: LtIndexSpec = code.parse().unwrap();
        let series = build_lt_collection(&stack, kind, &[SpectralIndex::Nbr]).unwrap();
        assert_eq!(series.len(), 4);
        assert!(series.iter().all(|img| img.band_names().to_vec() == vec![code.to_string()]));
    }
}

#[test]
fn test_unsupported_names_are_configuration_errors() {
    assert!(matches!(
        "EVI".parse::<SpectralIndex>(),
        Err(LtError::Configuration { parameter: "index", .. })
    ));
    assert!(matches!(
        LtIndexSpec::from_config("TC", Some("median")),
        Err(LtError::Configuration { parameter: "reducer", .. })
    ));
}

#[test]
fn test_window_resolution_examples() {
    let wrapped: Vec<_> = resolve_window(2010, "11-01", "02-28")
        .unwrap()
        .iter()
        .map(|w| w.to_tuple())
        .collect();
    assert_eq!(
        wrapped,
        vec![
            (2009, "11-01".to_string(), "12-31".to_string()),
            (2010, "01-01".to_string(), "02-28".to_string()),
        ]
    );

    let summer: Vec<_> = resolve_window(2010, "06-10", "09-20")
        .unwrap()
        .iter()
        .map(|w| w.to_tuple())
        .collect();
    assert_eq!(summer, vec![(2010, "06-10".to_string(), "09-20".to_string())]);
}
