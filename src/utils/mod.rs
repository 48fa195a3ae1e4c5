pub mod time;

/// Generates a 21 character url-safe id, used for run ids.
pub fn longid() -> String {
    nanoid::nanoid!()
}
