//! End-to-end fits on synthetic spectra.

use xrf_fit::app::pipeline::prepare_store;
use xrf_fit::atomic::ReferenceTable;
use xrf_fit::data::{SampleConfig, synthesize_spectrum};
use xrf_fit::domain::{BoundType, LineAttr, ParamKey, ParamStore, Transition};
use xrf_fit::fit::{fit_batch, linear_spectrum_fitting};
use xrf_fit::math::{LmConfig, Snip};
use xrf_fit::models::ModelSpectrum;

fn noiseless(channels: usize) -> SampleConfig {
    SampleConfig {
        channels,
        continuum: 0.0,
        noise: false,
        ..SampleConfig::default()
    }
}

#[test]
fn nonlinear_fit_recovers_area_and_updates_store() {
    let table = ReferenceTable::builtin().unwrap();
    let elements = ["Fe_K"];
    let fe_area = ParamKey::line("Fe", Transition::Ka1, LineAttr::Area);

    let mut store = prepare_store(ParamStore::default_xrf(), &elements, Some("linear"), &table)
        .unwrap();
    assert_eq!(store.get(&fe_area).unwrap().bound_type, BoundType::Free);

    store.get_mut(&fe_area).unwrap().value = 2500.0;
    let truth = synthesize_spectrum(&store, &elements, &table, &noiseless(1400)).unwrap();
    store.get_mut(&fe_area).unwrap().value = 1000.0;

    let ms = ModelSpectrum::new(&store, &elements, &table).unwrap();
    let fit = ms
        .model_fit(&truth.channels, &truth.expected, None, &LmConfig::default())
        .unwrap();
    let solved = fit.values["Fe_ka1_area"];
    assert!((solved - 2500.0).abs() < 2500.0 * 1e-4, "{solved}");
    // secondaries follow the anchor
    assert_eq!(fit.values["Fe_kb1_area"], solved);

    fit.update_store(&mut store);
    assert_eq!(store.get(&fe_area).unwrap().value, solved);
    // fixed calibration is left where it was
    assert_eq!(store.global("e_linear").unwrap().value, 0.01);
}

#[test]
fn linear_and_batch_fits_agree() {
    let table = ReferenceTable::builtin().unwrap();
    let elements = ["Fe_K", "Cu_K"];
    let store = prepare_store(ParamStore::default_xrf(), &elements, None, &table).unwrap();
    let spectra: Vec<Vec<f64>> = [1, 2, 3]
        .into_iter()
        .map(|seed| {
            let config = SampleConfig {
                channels: 1400,
                seed,
                ..SampleConfig::default()
            };
            synthesize_spectrum(&store, &elements, &table, &config)
                .unwrap()
                .counts
        })
        .collect();
    let x: Vec<f64> = (0..1400u32).map(f64::from).collect();

    let batch = fit_batch(&x, &spectra, &store, &elements, &table, &Snip::default());
    assert_eq!(batch.len(), spectra.len());
    for (y, result) in spectra.iter().zip(batch) {
        let single =
            linear_spectrum_fitting(&x, y, &store, &elements, None, &table, &Snip::default())
                .unwrap();
        let batched = result.unwrap();
        assert_eq!(batched.areas(), single.areas());
        assert!(batched.area("Fe_K").unwrap() > 0.0);
    }
}
