#![no_main]

use libfuzzer_sys::fuzz_target;
use taskloop_runtime::{decode_tool_response, GatewayError};

fuzz_target!(|data: &[u8]| {
    let Some((status_byte, body)) = data.split_first() else {
        return;
    };
    let status = if status_byte % 4 == 0 { 500 } else { 200 };
    let body = String::from_utf8_lossy(body);

    match decode_tool_response("sessions_history", status, &body) {
        Ok(response) => {
            assert_eq!(status, 200);
            let _ = response.into_value();
        }
        Err(error) => {
            assert!(error.to_string().starts_with("sessions_history failed:"));
            if let GatewayError::HttpStatus { body, .. } | GatewayError::NonJson { body, .. } = &error {
                assert!(body.chars().count() <= 300);
            }
        }
    }
});
