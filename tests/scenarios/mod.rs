//! Scenario-based tests for the provisioning orchestrator

mod helpers;

mod dao_deployment;
mod failure_handling;
mod graph_validation;
mod retry_behavior;
