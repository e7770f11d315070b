mod record;

pub use record::{
    Checkpoint, CheckpointError, load_checkpoint, load_full_model, load_parameter_state,
    record_from_bytes, record_to_bytes, save_checkpoint, save_full_model, save_parameter_state,
};
