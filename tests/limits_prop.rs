use chrono::{TimeZone, Utc};
use petra_ac::limits::{
    evaluate_discrete, evaluate_exclusive, evaluate_non_exclusive, LimitFlags, LimitLevel, LimitSet, RateSampler,
};
use petra_ac::Value;
use proptest::prelude::*;

fn tank_limits(deadband: f64) -> LimitSet {
    LimitSet {
        high_high: Some(100.0),
        high: Some(90.0),
        low: Some(10.0),
        low_low: Some(0.0),
        deadband,
    }
}

fn expected_level(input: f64) -> Option<LimitLevel> {
    if input >= 100.0 {
        Some(LimitLevel::HighHigh)
    } else if input >= 90.0 {
        Some(LimitLevel::High)
    } else if input <= 0.0 {
        Some(LimitLevel::LowLow)
    } else if input <= 10.0 {
        Some(LimitLevel::Low)
    } else {
        None
    }
}

proptest! {
    #[test]
    fn test_exclusive_reports_outermost_level(input in -50.0f64..150.0) {
        let level = evaluate_exclusive(input, &tank_limits(0.0), None);
        prop_assert_eq!(level, expected_level(input));
    }

    #[test]
    fn test_non_exclusive_levels_nest(input in -50.0f64..150.0) {
        let flags = evaluate_non_exclusive(input, &tank_limits(0.0), LimitFlags::default());
        if flags.high_high {
            prop_assert!(flags.high);
        }
        if flags.low_low {
            prop_assert!(flags.low);
        }
        prop_assert!(!(flags.high && flags.low));
        prop_assert_eq!(flags.any(), expected_level(input).is_some());
    }

    #[test]
    fn test_deadband_holds_active_level(deadband in 0.5f64..10.0, fraction in 0.01f64..0.99) {
        let limits = tank_limits(deadband);
        let inside = 90.0 - deadband * fraction;
        prop_assert_eq!(
            evaluate_exclusive(inside, &limits, Some(LimitLevel::High)),
            Some(LimitLevel::High)
        );
        prop_assert_eq!(evaluate_exclusive(inside, &limits, None), None);
        prop_assert_eq!(evaluate_exclusive(90.0 - deadband, &limits, Some(LimitLevel::High)), None);
    }

    #[test]
    fn test_discrete_normal_set_membership(
        normals in prop::collection::vec(-20i64..20, 1..6),
        input in -20i64..20,
    ) {
        let normal_values: Vec<Value> = normals.iter().map(|v| Value::Int(*v)).collect();
        let active = evaluate_discrete(&Value::Int(input), &normal_values);
        prop_assert_eq!(active, !normals.contains(&input));
    }

    #[test]
    fn test_rate_is_per_second(
        v0 in -1000.0f64..1000.0,
        v1 in -1000.0f64..1000.0,
        millis in 1i64..600_000,
    ) {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::milliseconds(millis);
        let mut sampler = RateSampler::new(None);
        prop_assert_eq!(sampler.record(v0, t0), None);
        let rate = sampler.record(v1, t1).unwrap();
        let expected = (v1 - v0) / (millis as f64 / 1000.0);
        prop_assert!((rate - expected).abs() <= 1e-9 * expected.abs().max(1.0));
    }
}
