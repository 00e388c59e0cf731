mod common;

use chrono::Duration;
use market_structure::cache::FileTimelineStore;
use market_structure::source::{BarSource, CsvBarSource};
use market_structure::{
    AnalysisError, AnalysisParams, AnalysisService, BarSourceError, InMemoryTimelineStore, Subject, Timeframe,
    TimelineStore,
};
use rayon::prelude::*;

use common::{bars_from_closes, csv_for, rising_closes};

#[test]
fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let subject = Subject::new("CL", Timeframe::Hour1);
    let params = AnalysisParams::for_timeframe(Timeframe::Hour1);
    let bars = bars_from_closes(&rising_closes(6), Duration::hours(1));

    {
        let service = AnalysisService::new(FileTimelineStore::open(dir.path()).unwrap());
        let report = service.analyze(&subject, bars.clone(), &params).unwrap();
        assert!(report.timeline.is_empty());
    }

    let service = AnalysisService::new(FileTimelineStore::open(dir.path()).unwrap());
    let report = service.analyze(&subject, bars, &params).unwrap();
    assert!(report.timeline.is_empty());

    let state = service.store().load(&subject).unwrap().unwrap();
    assert_eq!(state.version, 2);
    assert_eq!(state.last_regime, report.market_state.regime);
    assert_eq!(state.last_zone_signature, report.zone_signature);
}

#[test]
fn test_same_subject_calls_are_serialized() {
    let service = AnalysisService::new(InMemoryTimelineStore::new());
    let subject = Subject::new("GC", Timeframe::Min15);
    let params = AnalysisParams::for_timeframe(Timeframe::Min15);
    let bars = bars_from_closes(&rising_closes(5), Duration::minutes(15));

    let reports: Vec<_> = (0..16)
        .into_par_iter()
        .map(|_| service.analyze(&subject, bars.clone(), &params).unwrap())
        .collect();

    assert_eq!(reports.len(), 16);
    assert!(reports.iter().all(|r| r.timeline.is_empty()));
    assert_eq!(service.store().load(&subject).unwrap().map(|s| s.version), Some(16));
}

#[test]
fn test_subjects_are_independent() {
    let service = AnalysisService::new(InMemoryTimelineStore::new());
    let params = AnalysisParams::for_timeframe(Timeframe::Hour1);
    let bars = bars_from_closes(&rising_closes(5), Duration::hours(1));

    let subjects: Vec<Subject> = ["AAPL", "MSFT", "NVDA", "AMZN"]
        .iter()
        .map(|s| Subject::new(*s, Timeframe::Hour1))
        .collect();
    subjects.par_iter().for_each(|subject| {
        service.analyze(subject, bars.clone(), &params).unwrap();
    });

    for subject in &subjects {
        assert_eq!(service.store().load(subject).unwrap().map(|s| s.version), Some(1));
    }
    assert_eq!(service.store().len(), 4);
}

#[test]
fn test_analyze_from_csv_source() {
    let dir = tempfile::tempdir().unwrap();
    let subject = Subject::new("BTC/USDT", Timeframe::Hour4);
    let bars = bars_from_closes(&rising_closes(6), Duration::hours(4));
    std::fs::write(dir.path().join(format!("{}.csv", subject.storage_key())), csv_for(&bars)).unwrap();

    let source = CsvBarSource::in_dir(dir.path());
    assert_eq!(source.fetch(&subject).unwrap().len(), bars.len());

    let service = AnalysisService::new(InMemoryTimelineStore::new());
    let params = AnalysisParams::for_timeframe(Timeframe::Hour4);
    let report = service.analyze_from_source(&source, &subject, &params).unwrap();
    assert_eq!(report.subject, subject);
    assert_eq!(report.as_of, bars[bars.len() - 1].timestamp);
}

#[test]
fn test_source_failures_are_typed() {
    let dir = tempfile::tempdir().unwrap();
    let source = CsvBarSource::in_dir(dir.path());
    let service = AnalysisService::new(InMemoryTimelineStore::new());
    let params = AnalysisParams::for_timeframe(Timeframe::Day1);

    let result = service.analyze_from_source(&source, &Subject::new("MISSING", Timeframe::Day1), &params);
    assert!(matches!(result, Err(AnalysisError::Source(BarSourceError::NoData(_)))));
    assert!(service.store().is_empty());
}

#[test]
fn test_invalid_params_skip_the_source() {
    let service = AnalysisService::new(InMemoryTimelineStore::new());
    let mut params = AnalysisParams::for_timeframe(Timeframe::Day1);
    params.fakeout_window = 0;

    // nothing is registered, so reaching the source would be NoData
    let result = service.analyze_from_source(&CsvBarSource::new(), &Subject::new("ES", Timeframe::Day1), &params);
    assert!(matches!(result, Err(AnalysisError::InvalidParams(_))));
}
