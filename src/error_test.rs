use crate::ConfigError;
use crate::StoreError;

#[test]
fn cancelled_detection_covers_cluster_wrapped_cancellation() {
    assert!(StoreError::Cancelled.is_cancelled());
    assert!(StoreError::Cluster {
        message: "request torn down".into(),
        cancelled: true,
    }
    .is_cancelled());

    assert!(!StoreError::Cluster {
        message: "all endpoints unreachable".into(),
        cancelled: false,
    }
    .is_cancelled());
    assert!(!StoreError::NotFound.is_cancelled());
    assert!(!StoreError::Other("boom".into()).is_cancelled());
}

#[test]
fn expected_outcome_predicates_match_their_kinds() {
    assert!(StoreError::NotFound.is_not_found());
    assert!(!StoreError::NodeExists.is_not_found());
    assert!(StoreError::NodeExists.is_node_exists());
    assert!(!StoreError::CasFailed.is_node_exists());
}

#[test]
fn config_errors_render_actionable_messages() {
    assert_eq!(
        ConfigError::NoEndpoints.to_string(),
        "need at least one endpoint"
    );
    assert_eq!(
        ConfigError::EmptyVoterValue.to_string(),
        "voter value for key cannot be empty"
    );
}

#[test]
fn cluster_errors_carry_their_detail() {
    let err = StoreError::Cluster {
        message: "no quorum".into(),
        cancelled: false,
    };
    assert_eq!(err.to_string(), "cluster error: no quorum");
}
