use std::fs;

use sweep_exp::{CancelController, STOP_FILE};

#[test]
fn new_controller_clears_a_stale_sentinel() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let sentinel = temp.path().join(STOP_FILE);
    fs::write(&sentinel, "left over").expect("stale sentinel");

    let controller = CancelController::new(&sentinel).expect("controller");
    assert!(!sentinel.exists());
    assert!(!controller.token().is_cancelled());
}

#[test]
fn request_stop_writes_timestamped_sentinel_and_cancels() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let sentinel = temp.path().join("out").join(STOP_FILE);
    let controller = CancelController::new(&sentinel).expect("controller");
    let token = controller.token();

    controller.request_stop().expect("stop");
    assert!(token.is_cancelled());
    let text = fs::read_to_string(&sentinel).expect("sentinel text");
    assert!(text.starts_with("stop requested at "));
    let stamp = text.trim().trim_start_matches("stop requested at ");
    assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok(), "{stamp}");
}

#[test]
fn sentinel_created_elsewhere_is_observed() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let controller = CancelController::new(temp.path().join(STOP_FILE)).expect("controller");
    let token = controller.token();
    assert!(!token.is_cancelled());
    fs::write(controller.sentinel(), "").expect("touch sentinel");
    assert!(token.is_cancelled());
}
