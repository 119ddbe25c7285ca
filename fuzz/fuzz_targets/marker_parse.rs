#![no_main]

use libfuzzer_sys::fuzz_target;
use taskloop_return_loop::{parse_markers, MarkerKind};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    // First line is the task id, the rest is the reply.
    let (task_id, reply) = raw.split_once('\n').unwrap_or(("T1", raw.as_ref()));

    let markers = parse_markers(reply, task_id);
    assert_eq!(markers, parse_markers(reply, task_id));
    for (position, marker) in markers.iter().enumerate() {
        assert_eq!(marker.index as usize, position);
        match &marker.kind {
            MarkerKind::Comment { text } => assert!(!text.trim().is_empty()),
            MarkerKind::Complete { summary } => {
                assert!(summary.as_deref().map_or(true, |value| !value.is_empty()))
            }
            MarkerKind::Blocked { reason } => {
                assert!(reason.as_deref().map_or(true, |value| !value.is_empty()))
            }
        }
        assert_eq!(marker.payload_hash().len(), 64);
    }
});
