use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};

/// Loop instruments. Recording is a no-op until a meter provider is installed.
#[derive(Clone)]
pub struct PipelineMetrics {
    pub frame_duration: Histogram<f64>,
    pub frames: Counter<u64>,
    pub frames_skipped: Counter<u64>,
    pub detections: Counter<u64>,
    pub frame_errors: Counter<u64>,
}

impl PipelineMetrics {
    pub fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.005, 0.01, 0.02, 0.033, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 2.0,
        ];

        Self {
            frame_duration: meter
                .f64_histogram("pipeline_frame_duration_seconds")
                .with_description("Time to detect, annotate and store one sampled frame")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            frames: meter
                .u64_counter("pipeline_frames_total")
                .with_description("Total frames pulled from the source")
                .build(),
            frames_skipped: meter
                .u64_counter("pipeline_frames_skipped_total")
                .with_description("Frames skipped by the sample rate")
                .build(),
            detections: meter
                .u64_counter("pipeline_detections_total")
                .with_description("Total detection records produced")
                .build(),
            frame_errors: meter
                .u64_counter("pipeline_frame_errors_total")
                .with_description("Frames dropped because of a read, detector or encode error")
                .build(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new("pipeline")
    }
}
