//! Filter graphs and sampling arithmetic shared by the poster and preview steps

use crate::config::PreviewSettings;

/// Fallback poster timestamp, and the floor for every computed one
pub const MIN_POSTER_TIMESTAMP: u64 = 5;

/// Scale to fit inside `width`x`height` keeping the aspect ratio, then pad
/// with black to exactly that size.
pub fn scale_pad_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black",
        w = width,
        h = height
    )
}

/// Seconds into the source at which the poster frame is taken.
///
/// `max(5, duration / 2)`; an unknown duration (0) also gives 5.
pub fn poster_timestamp(duration_secs: u64) -> u64 {
    (duration_secs / 2).max(MIN_POSTER_TIMESTAMP)
}

/// How the preview is produced for a given source duration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewPlan {
    /// Nothing to sample
    Skip,
    /// Source is shorter than the preview; encode all of it
    WholeSource,
    /// Concatenate `starts.len()` segments of `segment_duration` seconds
    Sampled {
        starts: Vec<u64>,
        segment_duration: u32,
    },
}

/// Choose the preview strategy and, for long sources, the segment starts.
///
/// Segment `i` starts at `i * (duration / segment_count)`.
pub fn plan_preview(duration_secs: u64, settings: &PreviewSettings) -> PreviewPlan {
    if duration_secs == 0 {
        return PreviewPlan::Skip;
    }

    let count = u64::from(settings.segment_count());
    if duration_secs < u64::from(settings.total_duration) || count == 0 {
        return PreviewPlan::WholeSource;
    }

    let spacing = duration_secs / count;
    PreviewPlan::Sampled {
        starts: (0..count).map(|i| i * spacing).collect(),
        segment_duration: settings.segment_duration,
    }
}

/// `-filter_complex` graph for a sampled preview.
///
/// Each segment is trimmed from the first video stream and its timestamps
/// reset, the segments are concatenated in order, and the scale/pad filter is
/// applied once to the result. The output pad is `[final]`.
pub fn sampled_filter_graph(starts: &[u64], segment_duration: u32, width: u32, height: u32) -> String {
    let mut parts: Vec<String> = starts
        .iter()
        .enumerate()
        .map(|(i, start)| {
            format!(
                "[0:v]trim=start={}:duration={},setpts=PTS-STARTPTS[v{}]",
                start, segment_duration, i
            )
        })
        .collect();

    let inputs: String = (0..starts.len()).map(|i| format!("[v{}]", i)).collect();
    parts.push(format!("{}concat=n={}:v=1:a=0[out]", inputs, starts.len()));
    parts.push(format!("[out]{}[final]", scale_pad_filter(width, height)));

    parts.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn preview(total: u32, segment: u32) -> PreviewSettings {
        PreviewSettings {
            total_duration: total,
            segment_duration: segment,
            ..PreviewSettings::default()
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Long sources are sampled with evenly spaced, in-range segment starts
        #[test]
        fn prop_sampled_starts_are_evenly_spaced(
            segment in 1u32..10,
            extra in 0u32..60,
            surplus in 0u64..100_000,
        ) {
            let settings = preview(segment + extra, segment);
            let duration = u64::from(settings.total_duration) + surplus;
            let count = u64::from(settings.segment_count());

            match plan_preview(duration, &settings) {
                PreviewPlan::Sampled { starts, segment_duration } => {
                    prop_assert_eq!(segment_duration, segment);
                    prop_assert_eq!(starts.len() as u64, count);
                    for (i, start) in starts.iter().enumerate() {
                        prop_assert_eq!(*start, i as u64 * (duration / count));
                        prop_assert!(*start < duration);
                    }
                }
                other => prop_assert!(false, "expected sampled plan, got {:?}", other),
            }
        }

        // Anything shorter than the preview takes the whole-source path
        #[test]
        fn prop_short_sources_use_whole_source(
            total in 2u32..120,
            duration in 1u64..120,
        ) {
            prop_assume!(duration < u64::from(total));
            prop_assert_eq!(plan_preview(duration, &preview(total, 2)), PreviewPlan::WholeSource);
        }

        #[test]
        fn prop_poster_timestamp_never_below_floor(duration in 0u64..1_000_000) {
            let ts = poster_timestamp(duration);
            prop_assert!(ts >= MIN_POSTER_TIMESTAMP);
            prop_assert!(ts == MIN_POSTER_TIMESTAMP || ts == duration / 2);
        }
    }

    #[test]
    fn test_two_minute_source_with_default_settings() {
        let plan = plan_preview(120, &PreviewSettings::default());
        assert_eq!(
            plan,
            PreviewPlan::Sampled {
                starts: vec![0, 20, 40, 60, 80, 100],
                segment_duration: 2,
            }
        );
        assert_eq!(poster_timestamp(120), 60);
    }

    #[test]
    fn test_eight_second_source_falls_back() {
        assert_eq!(plan_preview(8, &PreviewSettings::default()), PreviewPlan::WholeSource);
        assert_eq!(poster_timestamp(8), 5);
    }

    #[test]
    fn test_unknown_duration() {
        assert_eq!(plan_preview(0, &PreviewSettings::default()), PreviewPlan::Skip);
        assert_eq!(poster_timestamp(0), 5);
    }

    #[test]
    fn test_exactly_preview_length_is_sampled() {
        let plan = plan_preview(12, &PreviewSettings::default());
        assert_eq!(
            plan,
            PreviewPlan::Sampled {
                starts: vec![0, 2, 4, 6, 8, 10],
                segment_duration: 2,
            }
        );
    }

    #[test]
    fn test_scale_pad_filter() {
        assert_eq!(
            scale_pad_filter(250, 150),
            "scale=250:150:force_original_aspect_ratio=decrease,pad=250:150:(ow-iw)/2:(oh-ih)/2:black"
        );
    }

    #[test]
    fn test_sampled_filter_graph() {
        let graph = sampled_filter_graph(&[0, 20], 2, 250, 150);
        assert_eq!(
            graph,
            "[0:v]trim=start=0:duration=2,setpts=PTS-STARTPTS[v0];\
             [0:v]trim=start=20:duration=2,setpts=PTS-STARTPTS[v1];\
             [v0][v1]concat=n=2:v=1:a=0[out];\
             [out]scale=250:150:force_original_aspect_ratio=decrease,pad=250:150:(ow-iw)/2:(oh-ih)/2:black[final]"
        );
    }
}
