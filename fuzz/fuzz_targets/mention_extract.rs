#![no_main]

use libfuzzer_sys::fuzz_target;
use taskloop_return_loop::{extract_mention_handles, filter_agent_handles};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let handles = extract_mention_handles(&raw);
    for handle in &handles {
        assert!(!handle.is_empty() && handle.len() <= 32);
        assert_eq!(handle, &handle.to_ascii_lowercase());
    }
    let known = filter_agent_handles(handles.iter().map(String::as_str));
    assert!(known.len() <= handles.len());
});
