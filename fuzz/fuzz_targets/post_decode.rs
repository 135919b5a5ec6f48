#![no_main]
use libfuzzer_sys::fuzz_target;

use ember::posts::model::Post;

fuzz_target!(|data: &[u8]| {
    // Canonical decode of a post as it would arrive in a NewPost/PostsResponse
    // wire message, followed by signature verification over arbitrary bytes —
    // both must reject cleanly rather than panic.
    if let Ok(post) = serde_json::from_slice::<Post>(data) {
        let _ = post.verify_signature();
    }
});
