use std::fs;

use radiant::env::scenario::DETERMINISTIC_SCENARIO;
use radiant::env::{timestep_per_episode, workspace_path};
use radiant::wrappers::{
    ExtremeFlowControlWrapper, HeatPumpEnergyWrapper, LoggerWrapper, MultiObsWrapper,
    NormalizeAction, NormalizeObservation,
};
use radiant::{
    Attribute, DEFAULT_SCENARIO, EnvError, Environment, Scenario, WrapperStack, get_wrapper_attr,
    is_wrapped, make,
};

fn building(dir: &std::path::Path) -> Box<dyn Environment> {
    let scenario = Scenario::lookup(DETERMINISTIC_SCENARIO)
        .expect("scenario")
        .with_runperiod_days(1)
        .with_timesteps_per_hour(2);
    make(&scenario, dir.join("radiant"), 1).expect("building")
}

#[test]
fn radiant_stack_wraps_the_building_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = WrapperStack::radiant(3)
        .apply(building(dir.path()))
        .expect("stack");
    assert_eq!(
        env.layers(),
        vec![
            LoggerWrapper::NAME,
            NormalizeAction::NAME,
            ExtremeFlowControlWrapper::NAME,
            NormalizeObservation::NAME,
            MultiObsWrapper::NAME,
            HeatPumpEnergyWrapper::NAME,
            "RadiantBuilding",
        ]
    );
    assert_eq!(env.observation_dim(), 3 * 14);
    assert_eq!(env.action_space().low, vec![-1.0, -1.0]);
    assert_eq!(timestep_per_episode(env.as_ref()).expect("tpe"), 49);
}

#[test]
fn a_full_episode_through_the_stack_is_logged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut env = WrapperStack::radiant(2)
        .apply(building(dir.path()))
        .expect("stack");
    let workspace = workspace_path(env.as_ref()).expect("workspace");
    assert!(workspace.to_string_lossy().ends_with("radiant-res1"));

    let (observation, _) = env.reset(Some(3)).expect("reset");
    assert_eq!(observation.len(), 28);
    let mut steps = 0;
    loop {
        let step = env.step(&[1.0, 0.5]).expect("step");
        steps += 1;
        assert!(step.reward.is_finite());
        assert!(step.info.contains_key("heat_pump_power"));
        if step.done() {
            assert!(step.truncated);
            break;
        }
    }
    assert_eq!(steps, 48);
    assert!(env.step(&[1.0, 0.5]).is_err());

    let episode = get_wrapper_attr(env.as_ref(), "episode_path")
        .and_then(|attr| attr.into_path("episode_path"))
        .expect("episode path");
    let monitor = fs::read_to_string(episode.join("monitor.csv")).expect("monitor");
    assert_eq!(monitor.lines().count(), 1 + 1 + 48);

    env.close().expect("close");
    let progress = fs::read_to_string(workspace.join("progress.csv")).expect("progress");
    assert_eq!(progress.lines().count(), 2);
    let mean = fs::read_to_string(workspace.join("mean.txt")).expect("mean");
    assert_eq!(mean.lines().count(), 28);
    assert_eq!(
        env.attribute("is_closed"),
        Some(Attribute::Flag(true))
    );
}

#[test]
fn identical_stacks_for_train_and_eval() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stack = WrapperStack::radiant(1);
    let train = stack.apply(building(dir.path())).expect("train");
    let eval = stack.apply(building(dir.path())).expect("eval");
    assert_eq!(train.layers(), eval.layers());
    assert_ne!(
        workspace_path(train.as_ref()).expect("train workspace"),
        workspace_path(eval.as_ref()).expect("eval workspace")
    );
}

#[test]
fn stack_without_normalization_exposes_no_statistics() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = WrapperStack::radiant(1)
        .without(NormalizeObservation::NAME)
        .apply(building(dir.path()))
        .expect("stack");
    assert!(!is_wrapped(env.as_ref(), NormalizeObservation::NAME));
    assert!(get_wrapper_attr(env.as_ref(), "mean").is_err());
}

fn stochastic_stack(dir: &std::path::Path, seed: u64) -> Box<dyn Environment> {
    let scenario = Scenario::lookup(DEFAULT_SCENARIO)
        .expect("scenario")
        .with_runperiod_days(1)
        .with_timesteps_per_hour(2);
    let building = make(&scenario, dir.join("radiant"), seed).expect("building");
    WrapperStack::radiant(2).apply(building).expect("stack")
}

#[test]
fn reset_seed_replays_stochastic_weather() {
    let first_dir = tempfile::tempdir().expect("tempdir");
    let second_dir = tempfile::tempdir().expect("tempdir");
    let mut first = stochastic_stack(first_dir.path(), 1);
    let mut second = stochastic_stack(second_dir.path(), 99);

    let (first_obs, _) = first.reset(Some(5)).expect("reset");
    let (second_obs, _) = second.reset(Some(5)).expect("reset");
    assert_eq!(first_obs, second_obs);
    for action in [[1.0, 0.5], [-0.5, 1.0], [0.2, -1.0], [1.0, 1.0], [-1.0, 0.0]] {
        let left = first.step(&action).expect("step");
        let right = second.step(&action).expect("step");
        assert_eq!(left.observation, right.observation);
        assert_eq!(left.reward, right.reward);
    }
}

#[test]
fn close_is_idempotent_and_final() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut env = WrapperStack::radiant(2)
        .apply(building(dir.path()))
        .expect("stack");
    let workspace = workspace_path(env.as_ref()).expect("workspace");
    env.reset(None).expect("reset");
    for _ in 0..3 {
        env.step(&[1.0, 0.5]).expect("step");
    }

    env.close().expect("first close");
    env.close().expect("second close");
    let progress = fs::read_to_string(workspace.join("progress.csv")).expect("progress");
    assert_eq!(progress.lines().count(), 2);
    assert!(matches!(env.step(&[1.0, 0.5]), Err(EnvError::Closed)));
    assert!(matches!(env.reset(None), Err(EnvError::Closed)));
}
