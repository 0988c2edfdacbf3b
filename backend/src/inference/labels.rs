/// Returned for indices the classifier emits beyond the table.
pub const UNKNOWN_LABEL: &str = "Unknown Disease";

/// Class names in classifier output order. Must change in lockstep with the model.
pub const LABELS: [&str; 20] = [
    "Apple_scab",
    "Apple_black_rot",
    "Apple_cedar_apple_rust",
    "Apple_healthy",
    "Blueberry_healthy",
    "Cherry_powdery_mildew",
    "Cherry_healthy",
    "Corn_cercospora_leaf_spot",
    "Corn_common_rust",
    "Corn_northern_leaf_blight",
    "Corn_healthy",
    "Grape_black_rot",
    "Grape_esca_black_measles",
    "Grape_leaf_blight",
    "Grape_healthy",
    "Orange_haunglongbing",
    "Peach_bacterial_spot",
    "Peach_healthy",
    "Pepper_bacterial_spot",
    "Pepper_healthy",
];

pub fn label_for(index: usize) -> &'static str {
    LABELS.get(index).copied().unwrap_or(UNKNOWN_LABEL)
}

pub fn num_classes() -> usize {
    LABELS.len()
}
