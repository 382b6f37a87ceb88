pub mod consent;
pub mod doctor;
pub mod invitation;
pub mod patient;
pub mod study;

pub use consent::PatientConsent;
pub use doctor::{Doctor, DoctorRole};
pub use invitation::{InvitationStatus, StudyInvitation};
pub use patient::{DoctorToPatient, Patient};
pub use study::{ConsentDoc, Study, StudyToPatient};
