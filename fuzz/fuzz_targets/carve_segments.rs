#![no_main]

use libfuzzer_sys::fuzz_target;
use sifter_cli::builtin::workers::find_segments;

fuzz_target!(|data: &[u8]| {
    let segments = find_segments(data);

    // 세그먼트는 겹치지 않고 오프셋 순이며 내용 범위 안에 있어야 함
    let mut previous_end = 1;
    for segment in &segments {
        assert!(segment.offset >= previous_end);
        assert!(segment.offset < segment.end);
        assert!(segment.end <= data.len());
        previous_end = segment.end;
    }
});
