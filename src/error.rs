use quick_error::quick_error;
use std::io::Error as IOError;
use std::path::PathBuf;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum AlicError {
        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
            display("I/O error: {}", err)
        }

        Csv(err: csv::Error) {
            from()
            source(err)
            display("CSV error: {}", err)
        }

        Config(err: toml::de::Error) {
            from()
            source(err)
            display("Invalid configuration file: {}", err)
        }

        InvalidConfig(msg: String) {
            display("Invalid configuration: {}", msg)
        }

        /// A CSV table does not have the expected columns, or its rows do not fit together.
        InvalidTable(msg: String) {
            display("Invalid table: {}", msg)
        }

        /// A required input file does not exist. Carries the expected path.
        MissingInput(path: PathBuf) {
            display("Required input file not found: {}", path.display())
        }

        InvalidNifti(msg: String) {
            display("Invalid NIfTI file: {}", msg)
        }

        InvalidTck(msg: String) {
            display("Invalid tck file: {}", msg)
        }

        InvalidAffine(msg: String) {
            display("Invalid affine: {}", msg)
        }

        SingularAffine {
            display("Affine matrix is not invertible")
        }

        DegenerateStreamline(num_points: usize) {
            display("A streamline needs at least 2 points, got {}", num_points)
        }

        UnknownLabel(label: i32) {
            display("Label {} is not in the lookup table", label)
        }

        ShapeMismatch(expected: [usize; 3], found: [usize; 3]) {
            display("Grid shape mismatch: expected {:?}, found {:?}", expected, found)
        }

        /// A transform was used for the opposite mapping direction.
        TransformDirection(expected: String, found: String) {
            display("Transform maps {} but {} was requested", found, expected)
        }

        InverseDidNotConverge(point: [f64; 3]) {
            display("Inverse deformation did not converge for point {:?}", point)
        }

        NonMonotonicTrajectory(subject: String) {
            display("Centroid trajectory of subject '{}' is not strictly monotonic along the anterior-posterior axis", subject)
        }

        DividerOutOfRange(cut: usize, lower: usize, upper: usize) {
            display("Mid point {} of divider is outside the region support [{}, {}]", cut, lower, upper)
        }

        EmptySupport(what: String) {
            display("{} has no non-zero voxels", what)
        }

        ExternalTool(program: String, code: Option<i32>) {
            display("External tool '{}' failed with exit status {:?}", program, code)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, AlicError>;
