pub mod scanner;
pub mod seeder;
pub mod sidecar;
pub mod sync;
