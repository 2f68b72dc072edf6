//! Tests for the delay-profile planner's shape and correctness.

use float_cmp::approx_eq;
use motion::{plan_to_vec, DelayProfile, Kinematics, ProfileError};

fn kin(vel: f64, acc: f64) -> Kinematics {
    Kinematics { jerk: 100.0, velocity: vel, acceleration: acc }
}

#[test]
fn first_delay_matches_taylor_seed() {
    let delays = plan_to_vec(500, &kin(2000.0, 1000.0)).unwrap();
    let t0 = (2.0_f64 / 1000.0).sqrt();

    // Step 1 of the ramp: t0 * (sqrt(2) - sqrt(1)).
    let expected = t0 * (2.0_f64.sqrt() - 1.0);
    assert!(approx_eq!(f64, delays[0], expected, epsilon = 1e-12));
    assert_eq!(delays.len(), 500);
}

#[test]
fn ramp_up_is_monotonically_decreasing() {
    let profile = DelayProfile::new(10_000, &kin(1000.0, 500.0)).unwrap();
    let d_min = profile.min_delay();
    let delays: Vec<f64> = profile.collect();

    let mut prev = f64::MAX;
    for &d in &delays {
        if d <= d_min + 1e-12 {
            break; // reached cruise
        }
        assert!(d < prev, "delay increased during ramp-up: {} -> {}", prev, d);
        prev = d;
    }
}

#[test]
fn cruise_floor_is_never_undercut() {
    let profile = DelayProfile::new(10_000, &kin(1000.0, 500.0)).unwrap();
    let d_min = profile.min_delay();
    let delays: Vec<f64> = profile.collect();

    // The terminal delay is the zero sentinel — nothing left to pace.
    let (last, body) = delays.split_last().unwrap();
    assert_eq!(*last, 0.0);
    for (i, &d) in body.iter().enumerate() {
        assert!(d >= d_min - 1e-12, "step {} delay {} undercuts {}", i + 1, d, d_min);
    }
}

#[test]
fn trapezoid_reaches_and_holds_cruise() {
    let profile = DelayProfile::new(10_000, &kin(1000.0, 500.0)).unwrap();
    let d_min = profile.min_delay();
    let steps_to_cruise = profile.steps_to_cruise();
    assert_eq!(steps_to_cruise, 1000);

    let delays: Vec<f64> = profile.collect();
    let cruise_count = delays.iter().filter(|&&d| d == d_min).count();

    // Roughly N - 2 * steps_to_cruise delays sit exactly on the floor.
    assert!(
        cruise_count as u32 > 10_000 - 2 * steps_to_cruise - 50,
        "only {} cruise delays",
        cruise_count
    );
}

#[test]
fn profile_is_symmetric_up_to_tolerance() {
    let n = 10_000usize;
    let profile = DelayProfile::new(n as u32, &kin(1000.0, 500.0)).unwrap();
    let steps_to_cruise = profile.steps_to_cruise() as usize;
    let delays: Vec<f64> = profile.collect();

    // The Taylor recurrences on the two ramps are exact mirrors, but each
    // is an approximation of the ideal sqrt ramp, so endpoints drift; the
    // interior of the ramps must agree within a few percent.
    for j in 25..steps_to_cruise - 25 {
        let up = delays[j];
        let down = delays[n - 1 - j];
        let rel = (up - down).abs() / up;
        assert!(rel < 0.05, "asymmetry at ramp step {}: {} vs {} ({:.1}%)", j, up, down, rel * 100.0);
    }
}

#[test]
fn short_move_truncates_to_triangle() {
    // 100 steps at these limits needs a 2000-step ramp: a pure triangle.
    let profile = DelayProfile::new(100, &kin(2000.0, 1000.0)).unwrap();
    let d_min = profile.min_delay();
    let delays: Vec<f64> = profile.collect();

    assert_eq!(delays.len(), 100);
    // Cruise is never reached, so every delay stays above the floor.
    let slowest = delays
        .iter()
        .take(delays.len() - 1)
        .cloned()
        .fold(f64::MAX, f64::min);
    assert!(slowest > d_min, "triangle profile touched the cruise floor");

    // The turnaround sits at N/2 + 1: delays fall until then, rise after.
    let turnaround = 51;
    for w in delays[..turnaround - 1].windows(2) {
        assert!(w[1] <= w[0] + 1e-12);
    }
    for w in delays[turnaround..delays.len() - 1].windows(2) {
        assert!(w[1] >= w[0] - 1e-12);
    }
}

#[test]
fn terminal_delay_is_zero_after_ramp_down() {
    let delays = plan_to_vec(5_000, &kin(1000.0, 500.0)).unwrap();
    assert_eq!(*delays.last().unwrap(), 0.0);
}

#[test]
fn invalid_inputs_are_rejected() {
    let good = kin(1000.0, 500.0);
    assert_eq!(DelayProfile::new(0, &good).unwrap_err(), ProfileError::ZeroLength);

    let zero_vel = Kinematics { velocity: 0.0, ..good };
    assert_eq!(DelayProfile::new(10, &zero_vel).unwrap_err(), ProfileError::InvalidKinematics);

    let zero_acc = Kinematics { acceleration: 0.0, ..good };
    assert_eq!(DelayProfile::new(10, &zero_acc).unwrap_err(), ProfileError::InvalidKinematics);

    let negative_jerk = Kinematics { jerk: -1.0, ..good };
    assert_eq!(DelayProfile::new(10, &negative_jerk).unwrap_err(), ProfileError::InvalidKinematics);

    let out_of_range = Kinematics { velocity: 20_000.0, ..good };
    assert_eq!(DelayProfile::new(10, &out_of_range).unwrap_err(), ProfileError::InvalidKinematics);
}

#[test]
fn single_step_profile() {
    let delays = plan_to_vec(1, &kin(1000.0, 500.0)).unwrap();
    assert_eq!(delays.len(), 1);
    assert!(delays[0] > 0.0);
}
