//! Scenario tests for the crowd simulation
//!
//! These tests run whole ticks through [`Crowd`] and check:
//! - Free motion and the reciprocal head-on manoeuvre
//! - Speed bounds and finiteness under dense overlap
//! - Corridor arrival, idle and stuck signalling
//! - Obstacle clearance
//! - Determinism of the parallel solve and timestep handling

#[cfg(test)]
mod tests {
    use crate::{
        AgentHandle, AgentParams, CorridorStatus, Crowd, CrowdConfig, NavEventKind, ObstacleShape,
        TimestepMode,
    };
    use crowd_common::{Error, Result, Vec2};

    fn params(max_speed: f32) -> AgentParams {
        AgentParams {
            radius: 0.5,
            max_speed,
            time_horizon: 2.0,
            time_horizon_obst: 2.0,
            ..Default::default()
        }
    }

    fn position(crowd: &Crowd, handle: AgentHandle) -> Vec2 {
        crowd.agent(handle).unwrap().position()
    }

    fn velocity(crowd: &Crowd, handle: AgentHandle) -> Vec2 {
        crowd.agent(handle).unwrap().velocity()
    }

    fn count_events(crowd: &Crowd, handle: AgentHandle, kind: NavEventKind) -> usize {
        crowd
            .last_report()
            .events
            .iter()
            .filter(|e| e.handle == handle && e.kind == kind)
            .count()
    }

    #[test]
    fn test_single_agent_empty_world() -> Result<()> {
        let mut crowd = Crowd::new(CrowdConfig::default())?;
        let agent = crowd.add_agent(Vec2::ZERO, params(1.0))?;
        crowd.set_preferred_velocity(agent, Vec2::new(1.0, 0.0))?;

        let dt = 0.1;
        crowd.tick(dt)?;

        assert!((velocity(&crowd, agent) - Vec2::new(1.0, 0.0)).length() < 1e-6);
        assert!((position(&crowd, agent) - Vec2::new(dt, 0.0)).length() < 1e-6);

        let report = crowd.last_report();
        assert_eq!(report.totals.soft_violations, 0);
        assert_eq!(report.totals.strong_collisions, 0);
        Ok(())
    }

    #[test]
    fn test_preferred_velocity_above_max_speed_is_clamped() -> Result<()> {
        let mut crowd = Crowd::new(CrowdConfig::default())?;
        let agent = crowd.add_agent(Vec2::ZERO, params(1.0))?;
        crowd.set_preferred_velocity(agent, Vec2::new(3.0, 4.0))?;

        crowd.tick(0.1)?;
        let v = velocity(&crowd, agent);
        assert!((v - Vec2::new(0.6, 0.8)).length() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_head_on_agents_pass_mirror_symmetrically() -> Result<()> {
        let mut crowd = Crowd::new(CrowdConfig::default())?;
        let a = crowd.add_agent(Vec2::new(-5.0, 0.0), params(1.0))?;
        let b = crowd.add_agent(Vec2::new(5.0, 0.0), params(1.0))?;
        crowd.set_preferred_velocity(a, Vec2::new(1.0, 0.0))?;
        crowd.set_preferred_velocity(b, Vec2::new(-1.0, 0.0))?;

        let mut max_lateral: f32 = 0.0;
        for _ in 0..100 {
            crowd.tick(0.1)?;
            let (va, vb) = (velocity(&crowd, a), velocity(&crowd, b));
            let (pa, pb) = (position(&crowd, a), position(&crowd, b));

            assert!((va + vb).length() < 1e-4);
            assert!((pa + pb).length() < 1e-4);
            max_lateral = max_lateral.max(va.y.abs());
        }

        assert!(max_lateral > 1e-3);
        assert!(position(&crowd, a).x > position(&crowd, b).x);
        Ok(())
    }

    #[test]
    fn test_dense_overlap_stays_finite_and_bounded() -> Result<()> {
        let mut crowd = Crowd::new(CrowdConfig::default())?;
        let mut handles = Vec::new();
        for i in 0..50 {
            let p = Vec2::new((i % 10) as f32 * 0.3, (i / 10) as f32 * 0.3);
            let handle = crowd.add_agent(p, params(2.0))?;
            crowd.set_preferred_velocity(handle, (Vec2::new(1.35, 0.6) - p) * 4.0)?;
            handles.push(handle);
        }

        crowd.tick(0.1)?;
        assert!(crowd.last_report().totals.strong_collisions > 0);

        for _ in 0..30 {
            crowd.tick(0.1)?;
            for &handle in &handles {
                let v = velocity(&crowd, handle);
                assert!(v.is_finite());
                assert!(position(&crowd, handle).is_finite());
                assert!(v.length() <= 2.0 + 1e-4);
            }
        }
        Ok(())
    }

    #[test]
    fn test_arrival_emitted_once_and_preferred_velocity_decays() -> Result<()> {
        let mut crowd = Crowd::new(CrowdConfig::default())?;
        let agent = crowd.add_agent(Vec2::ZERO, params(1.0))?;
        assert_eq!(
            crowd.set_corridor(agent, vec![Vec2::new(3.0, 0.0)], None)?,
            CorridorStatus::Following
        );

        let mut arrivals = 0;
        let mut after_arrival = Vec::new();
        for _ in 0..200 {
            crowd.tick(0.1)?;
            arrivals += count_events(&crowd, agent, NavEventKind::Arrived);
            if arrivals > 0 {
                let sample = crowd.last_report().sample(agent).unwrap();
                after_arrival.push(sample.preferred_velocity.length());
            }
        }

        assert_eq!(arrivals, 1);
        assert_eq!(
            crowd.agent(agent).unwrap().corridor_status(),
            Some(CorridorStatus::Arrived)
        );
        assert!(after_arrival.len() > 2);
        for pair in after_arrival.windows(2) {
            assert!(pair[1] < pair[0] || (pair[0] == 0.0 && pair[1] == 0.0));
        }
        assert_eq!(after_arrival.last().copied(), Some(0.0));

        assert_eq!(crowd.metrics().arrivals, 1);
        assert!(crowd.metrics().mean_time_to_goal().unwrap() > 2.0);
        Ok(())
    }

    #[test]
    fn test_multi_waypoint_corridor_reports_each_waypoint() -> Result<()> {
        let mut crowd = Crowd::new(CrowdConfig::default())?;
        let agent = crowd.add_agent(Vec2::ZERO, params(2.0))?;
        crowd.set_corridor(
            agent,
            vec![Vec2::new(2.0, 0.0), Vec2::new(2.0, 2.0), Vec2::new(4.0, 2.0)],
            Some(2.0),
        )?;

        let mut reached = Vec::new();
        for _ in 0..100 {
            crowd.tick(0.1)?;
            for event in &crowd.last_report().events {
                if let NavEventKind::WaypointReached { index } = event.kind {
                    reached.push(index);
                }
            }
        }
        assert_eq!(reached, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_unusable_corridor_leaves_agent_idle() -> Result<()> {
        let mut crowd = Crowd::new(CrowdConfig::default())?;
        let empty = crowd.add_agent(Vec2::ZERO, params(1.0))?;
        let behind = crowd.add_agent(Vec2::new(10.0, 10.0), params(1.0))?;

        assert_eq!(crowd.set_corridor(empty, Vec::new(), None)?, CorridorStatus::Idle);
        assert_eq!(
            crowd.set_corridor(
                behind,
                vec![Vec2::new(5.0, 10.0), Vec2::new(20.0, 10.0)],
                None
            )?,
            CorridorStatus::Idle
        );

        crowd.tick(0.1)?;
        assert_eq!(count_events(&crowd, empty, NavEventKind::Idle), 1);
        assert_eq!(count_events(&crowd, behind, NavEventKind::Idle), 1);
        assert_eq!(position(&crowd, empty), Vec2::ZERO);
        assert_eq!(position(&crowd, behind), Vec2::new(10.0, 10.0));

        // Signalled once, not every tick
        crowd.tick(0.1)?;
        assert_eq!(count_events(&crowd, empty, NavEventKind::Idle), 0);
        Ok(())
    }

    #[test]
    fn test_wall_ahead_increases_clearance_and_reports_stuck() -> Result<()> {
        let mut crowd = Crowd::new(CrowdConfig::default())?;
        crowd.add_obstacle(ObstacleShape::Polyline {
            vertices: vec![Vec2::new(1.5, 5.0), Vec2::new(1.5, -5.0)],
        })?;
        let agent = crowd.add_agent(Vec2::ZERO, params(1.0))?;
        crowd.set_preferred_velocity(agent, Vec2::new(1.0, 0.0))?;

        crowd.tick(0.1)?;
        // Unconstrained motion would have reached x = 0.1
        assert!(position(&crowd, agent).x < 0.1 - 1e-3);

        let mut stuck = count_events(&crowd, agent, NavEventKind::Stuck);
        for _ in 0..100 {
            crowd.tick(0.1)?;
            stuck += count_events(&crowd, agent, NavEventKind::Stuck);
            assert!(position(&crowd, agent).x + 0.5 <= 1.5 + 1e-3);
        }
        assert_eq!(stuck, 1);
        Ok(())
    }

    #[test]
    fn test_over_speed_request_in_open_space_is_not_stuck() -> Result<()> {
        let mut crowd = Crowd::new(CrowdConfig::default())?;
        let agent = crowd.add_agent(Vec2::ZERO, params(1.0))?;
        crowd.set_preferred_velocity(agent, Vec2::new(3.0, 4.0))?;

        let mut stuck = 0;
        for _ in 0..30 {
            crowd.tick(0.1)?;
            stuck += count_events(&crowd, agent, NavEventKind::Stuck);
        }

        assert!((velocity(&crowd, agent) - Vec2::new(0.6, 0.8)).length() < 1e-5);
        assert_eq!(stuck, 0);
        Ok(())
    }

    #[test]
    fn test_parallel_solve_matches_sequential() -> Result<()> {
        let parallel = CrowdConfig {
            parallel: true,
            parallel_threshold: 1,
            ..Default::default()
        };
        let sequential = CrowdConfig {
            parallel: false,
            ..Default::default()
        };

        let mut crowds = [Crowd::new(parallel)?, Crowd::new(sequential)?];
        for crowd in crowds.iter_mut() {
            crowd.add_obstacle(ObstacleShape::Circle {
                center: Vec2::ZERO,
                radius: 1.0,
            })?;
            for i in 0..24 {
                let angle = i as f32 * std::f32::consts::TAU / 24.0;
                let start = Vec2::new(angle.cos(), angle.sin()) * 8.0;
                let handle = crowd.add_agent(start, params(1.5))?;
                crowd.set_corridor(handle, vec![-start], None)?;
            }
        }

        for _ in 0..40 {
            for crowd in crowds.iter_mut() {
                crowd.tick(0.1)?;
            }
            let a: Vec<Vec2> = crowds[0].agents().map(|agent| agent.position()).collect();
            let b: Vec<Vec2> = crowds[1].agents().map(|agent| agent.position()).collect();
            assert_eq!(a, b);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_timestep_changes_nothing() -> Result<()> {
        let mut crowd = Crowd::new(CrowdConfig::default())?;
        let agent = crowd.add_agent(Vec2::ZERO, params(1.0))?;
        crowd.set_preferred_velocity(agent, Vec2::new(1.0, 0.0))?;

        for dt in [0.0, -0.1, f32::NAN, f32::INFINITY] {
            assert!(matches!(crowd.tick(dt), Err(Error::InvalidTimestep(_))));
        }
        assert_eq!(crowd.tick_count(), 0);
        assert_eq!(crowd.time(), 0.0);
        assert_eq!(position(&crowd, agent), Vec2::ZERO);
        assert_eq!(crowd.metrics().ticks, 0);
        Ok(())
    }

    #[test]
    fn test_despawn_on_arrival() -> Result<()> {
        let config = CrowdConfig {
            despawn_on_arrival: true,
            ..Default::default()
        };
        let mut crowd = Crowd::new(config)?;
        let walker = crowd.add_agent(Vec2::ZERO, params(1.0))?;
        let bystander = crowd.add_agent(Vec2::new(0.0, 20.0), params(1.0))?;
        crowd.set_corridor(walker, vec![Vec2::new(1.0, 0.0)], None)?;

        let mut arrived_at = None;
        for tick in 0..50 {
            crowd.tick(0.1)?;
            if count_events(&crowd, walker, NavEventKind::Arrived) > 0 {
                // The final sample is still published
                assert!(crowd.last_report().sample(walker).is_some());
                arrived_at = Some(tick);
                break;
            }
        }

        assert!(arrived_at.is_some());
        assert!(crowd.agent(walker).is_none());
        assert!(crowd.agent(bystander).is_some());
        assert_eq!(crowd.agent_count(), 1);
        assert!(matches!(
            crowd.set_preferred_velocity(walker, Vec2::ZERO),
            Err(Error::UnknownAgent(_))
        ));
        Ok(())
    }

    #[test]
    fn test_fixed_timestep_update() -> Result<()> {
        let config = CrowdConfig {
            timestep: TimestepMode::Fixed {
                step: 0.25,
                max_substeps: 4,
            },
            ..Default::default()
        };
        let mut crowd = Crowd::new(config)?;
        crowd.add_agent(Vec2::ZERO, params(1.0))?;

        assert_eq!(crowd.update(0.5)?, 2);
        assert_eq!(crowd.update(0.125)?, 0);
        assert_eq!(crowd.update(0.125)?, 1);
        // Capped at max_substeps, the backlog is dropped
        assert_eq!(crowd.update(10.0)?, 4);
        assert_eq!(crowd.update(0.0)?, 0);

        assert_eq!(crowd.tick_count(), 7);
        assert_eq!(crowd.time(), 1.75);
        assert_eq!(crowd.last_report().dt, 0.25);
        Ok(())
    }

    #[test]
    fn test_horizons_do_not_depend_on_timestep() -> Result<()> {
        // Same state solved with different tick lengths gives the same
        // velocity when the agents are not yet overlapping
        let mut velocities = Vec::new();
        for dt in [0.05, 0.2] {
            let mut crowd = Crowd::new(CrowdConfig::default())?;
            let a = crowd.add_agent(Vec2::new(-2.0, 0.1), params(1.0))?;
            let b = crowd.add_agent(Vec2::new(2.0, -0.1), params(1.0))?;
            crowd.set_preferred_velocity(a, Vec2::new(1.0, 0.0))?;
            crowd.set_preferred_velocity(b, Vec2::new(-1.0, 0.0))?;
            crowd.tick(dt)?;
            velocities.push(velocity(&crowd, a));
        }
        assert!((velocities[0] - velocities[1]).length() < 1e-5);
        Ok(())
    }
}
