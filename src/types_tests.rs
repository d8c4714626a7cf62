use super::*;
use chrono::TimeZone;

#[test]
fn test_derived_model_id_is_stable() {
    let a = ModelId::derived(&ModelTask::Completion, Complexity::Medium);
    let b = ModelId::derived(&ModelTask::Completion, Complexity::Medium);
    let c = ModelId::derived(&ModelTask::Chat, Complexity::Medium);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_model_id_parse_roundtrip() {
    let id = ModelId::new();
    assert_eq!(ModelId::parse(&id.to_string()).unwrap(), id);
    assert!(matches!(ModelId::parse("not-a-uuid"), Err(WarmupError::InvalidInput(_))));
}

#[test]
fn test_priority_ordering() {
    assert!(RequestPriority::Critical > RequestPriority::High);
    assert!(RequestPriority::High > RequestPriority::Medium);
    assert!(RequestPriority::Medium > RequestPriority::Low);
    assert_eq!(RequestPriority::from_rank(2), RequestPriority::High);
    assert_eq!(RequestPriority::from_rank(9), RequestPriority::Critical);
}

#[test]
fn test_request_time_buckets() {
    // 2026-03-02 is a Monday.
    let ts = Utc.with_ymd_and_hms(2026, 3, 2, 9, 15, 0).unwrap();
    let request = WarmupRequest::new(ModelTask::Completion, Complexity::Medium, RequestPriority::High)
        .with_timestamp(ts);
    assert_eq!(request.hour_of_day(), 9);
    assert_eq!(request.day_of_week(), 0);
}

#[test]
fn test_request_validation() {
    let ok = WarmupRequest::new(ModelTask::Chat, Complexity::Simple, RequestPriority::Low);
    assert!(ok.validate().is_ok());

    let mut no_user = ok.clone();
    no_user.user_context.user_id = "  ".into();
    assert!(matches!(no_user.validate(), Err(WarmupError::InvalidInput(_))));

    let mut zero_latency = ok.clone();
    zero_latency.acceptable_latency = Duration::ZERO;
    assert!(zero_latency.validate().is_err());

    let mut bad_score = ok.clone();
    bad_score.project_context.complexity_score = f64::NAN;
    assert!(bad_score.validate().is_err());

    let custom = WarmupRequest::new(ModelTask::Custom(String::new()), Complexity::Simple, RequestPriority::Low);
    assert!(custom.validate().is_err());
}

#[test]
fn test_prediction_scores_are_clamped() {
    let p = ModelPrediction::new(ModelId::new(), 1.7, -0.2, Duration::from_secs(5));
    assert_eq!(p.confidence_score, 1.0);
    assert_eq!(p.usage_probability, 0.0);

    let nan = ModelPrediction::new(ModelId::new(), f64::NAN, 0.5, Duration::ZERO);
    assert_eq!(nan.confidence_score, 0.0);
}

#[test]
fn test_availability_shortfall() {
    let avail = ResourceAvailability::new(1024, 30.0, 100.0, 4096);
    assert!(avail.admits(&ResourceRequirements::new(700, 10.0, 5.0, 50)));
    assert_eq!(
        avail.shortfall(&ResourceRequirements::new(2048, 1.0, 0.0, 0)),
        Some(ResourceDimension::Memory)
    );
    assert_eq!(
        avail.shortfall(&ResourceRequirements::new(10, 31.0, 0.0, 0)),
        Some(ResourceDimension::Cpu)
    );
}

#[test]
fn test_requirements_plus_and_peak() {
    let a = ResourceRequirements::new(100, 5.0, 1.0, 10);
    let b = ResourceRequirements::new(50, 8.0, 0.5, 20);
    assert_eq!(a.plus(&b), ResourceRequirements::new(150, 13.0, 1.5, 30));
    assert_eq!(a.peak(&b), ResourceRequirements::new(100, 8.0, 1.0, 20));
}

#[test]
fn test_task_state_terminal() {
    assert!(!TaskState::Queued.is_terminal());
    assert!(!TaskState::Loading.is_terminal());
    assert!(TaskState::Warm.is_terminal());
    assert!(TaskState::Failed.is_terminal());
    assert!(TaskState::Cancelled.is_terminal());
}
