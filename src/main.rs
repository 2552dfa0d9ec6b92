use std::sync::Arc;

use icp_planner::{
    capture_point, Foot, Footstep, FootstepPlan, IcpPlannerConfig, IcpReferenceGenerator,
    IcpSegment, NaturalFrequency, PlannedStep, StateEstimate, StepTiming, SupportPhase,
};
use nalgebra as na;

const COM_HEIGHT: f64 = 0.85;
const STEP_LENGTH: f64 = 0.3;
const STEP_WIDTH: f64 = 0.2;
/// Proportional ICP feedback standing in for the balance controller
const ICP_GAIN: f64 = 1.5;

/// Straight walk with a slight left turn, alternating feet
fn demo_plan(num_steps: usize) -> FootstepPlan {
    let left = Footstep::new(Foot::Left, na::Vector2::new(0.0, STEP_WIDTH / 2.0), 0.0);
    let right = Footstep::new(Foot::Right, na::Vector2::new(0.0, -STEP_WIDTH / 2.0), 0.0);

    let steps = (0..num_steps)
        .map(|i| {
            let foot = if i % 2 == 0 { Foot::Left } else { Foot::Right };
            let y = match foot {
                Foot::Left => STEP_WIDTH / 2.0,
                Foot::Right => -STEP_WIDTH / 2.0,
            };
            // Last step closes the stance next to the previous foot
            let x = STEP_LENGTH * (i + 1).min(num_steps - 1).max(1) as f64;
            PlannedStep {
                footstep: Footstep::new(foot, na::Vector2::new(x, y), 0.02 * i as f64),
                timing: StepTiming::new(0.6, 0.2),
            }
        })
        .collect();

    FootstepPlan::standing(left, right).with_steps(steps)
}

fn segment_name(segment: IcpSegment) -> &'static str {
    match segment {
        IcpSegment::Transfer => "Transfer",
        IcpSegment::SwingPreSpline => "Swing-Pre",
        IcpSegment::SwingSpline => "Swing-Spline",
        IcpSegment::SwingPostSpline => "Swing-Post",
        IcpSegment::Standstill => "Standstill",
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("ICP Reference Walkthrough");
    println!("=========================\n");

    // 1. Configuration and natural frequency
    let config = IcpPlannerConfig::default();
    let mut estimate = StateEstimate::standing(COM_HEIGHT);
    let omega = NaturalFrequency::from_source(&estimate, config.gravity)?;

    // 2. Generator on the initial plan snapshot
    let mut plan = Arc::new(demo_plan(6));
    let mut generator = IcpReferenceGenerator::new(config.clone(), Arc::clone(&plan), omega)?;

    println!("Planner Configuration:");
    println!("  COM height: {:.2} m", COM_HEIGHT);
    println!("  omega0: {:.3} rad/s", omega.value());
    println!("  Horizon: {} steps", config.horizon);
    println!("  Swing spline window: {:.2} s", config.swing_spline_duration);
    println!("  Planned footsteps: {}", plan.num_steps());
    println!();

    // 3. Control loop parameters
    let dt = 0.005;
    let hold_time = 0.5;
    let mut time = 0.0;
    let mut print_interval = 0.0;

    println!("Running at {:.0} Hz (dt = {:.4}s)\n", 1.0 / dt, dt);
    println!(
        "{:<6} {:<13} {:<18} {:<18} {:<18} {:<18}",
        "Time", "Segment", "ICP [x, y]", "ICP vel [x, y]", "CMP [x, y]", "CoM [x, y]"
    );
    println!("{}", "-".repeat(95));

    // 4. Walk: transfer then swing for every step, new snapshot at touchdown
    let mut phase = SupportPhase::Transfer;
    let mut phase_time = 0.0;
    let mut standing_time = 0.0;

    while standing_time < hold_time {
        // a. Estimator refresh; a constant height never triggers a rebuild
        generator.update_natural_frequency(&estimate)?;

        // b. Reference for this tick
        let reference = generator.compute(phase, phase_time);

        // c. LIP plant driven by the feed-forward CMP plus ICP feedback
        let w = generator.omega().value();
        let com = estimate.com_xy();
        let com_velocity = estimate.com_velocity_xy();
        let actual_icp = capture_point(&com, &com_velocity, generator.omega());
        let cmp = reference.cmp + ICP_GAIN * (actual_icp - reference.position);
        let com_acceleration = (com - cmp) * (w * w);
        let next_velocity = com_velocity + com_acceleration * dt;
        let next_com = com + next_velocity * dt;
        estimate.com_position = na::Vector3::new(next_com.x, next_com.y, COM_HEIGHT);
        estimate.com_velocity = na::Vector3::new(next_velocity.x, next_velocity.y, 0.0);

        // d. Print status periodically
        if time >= print_interval {
            println!(
                "{:<6.2} {:<13} [{:>6.3}, {:>6.3}]   [{:>6.3}, {:>6.3}]   [{:>6.3}, {:>6.3}]   [{:>6.3}, {:>6.3}]  err {:.4}",
                time,
                segment_name(reference.segment),
                reference.position.x, reference.position.y,
                reference.velocity.x, reference.velocity.y,
                reference.cmp.x, reference.cmp.y,
                com.x, com.y,
                (actual_icp - reference.position).norm(),
            );
            print_interval += 0.1;
        }

        // e. Advance the walking clock
        time += dt;
        if reference.segment == IcpSegment::Standstill {
            standing_time += dt;
            continue;
        }

        phase_time += dt;
        if phase_time >= generator.phase_duration(phase) {
            phase_time = 0.0;
            phase = match phase {
                SupportPhase::Transfer => SupportPhase::Swing,
                SupportPhase::Swing => {
                    let landed = generator.upcoming_footstep()?;
                    println!(
                        "       touchdown {:?} at [{:.2}, {:.2}]",
                        landed.foot, landed.position.x, landed.position.y
                    );
                    plan = Arc::new(plan.advanced());
                    generator.submit_plan(Arc::clone(&plan), generator.omega())?;
                    SupportPhase::Transfer
                }
            };
        }
    }

    println!("\n--- Walk Complete ---");
    println!(
        "Final ICP: [{:.3}, {:.3}]",
        generator.chain().final_icp().x,
        generator.chain().final_icp().y
    );
    println!(
        "Final CoM: [{:.3}, {:.3}] heading {:.3} rad",
        estimate.com_position.x,
        estimate.com_position.y,
        estimate.yaw()
    );
    println!("Recursion rebuilds: {}", generator.rebuild_count());

    Ok(())
}
