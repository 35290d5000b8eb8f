pub mod attendance;
pub mod backup;
pub mod classes;
pub mod cms;
pub mod dashboard;
pub mod exams;
pub mod fees;
pub mod health;
pub mod library;
pub mod newsletter;
pub mod notices;
pub mod results;
pub mod staff;
pub mod students;
pub mod subjects;
pub mod tokens;
pub mod transport;
