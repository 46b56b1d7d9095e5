use crate::domain::student::{PaymentStatus, Student};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct RosterRecord<'a> {
    student_id: &'a str,
    name: &'a str,
    balance: String,
    status: PaymentStatus,
    yearbook: bool,
    personalization: bool,
    autograph_supplement: bool,
    clear_cover: bool,
}

impl<'a> From<&'a Student> for RosterRecord<'a> {
    fn from(student: &'a Student) -> Self {
        Self {
            student_id: &student.student_id,
            name: &student.name,
            balance: student.balance.to_string(),
            status: student.status,
            yearbook: student.entitlements.yearbook,
            personalization: student.entitlements.personalization,
            autograph_supplement: student.entitlements.autograph_supplement,
            clear_cover: student.entitlements.clear_cover,
        }
    }
}

/// Writes the roster as CSV, in a shape `RosterReader` reads back.
pub struct RosterWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> RosterWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new().from_writer(sink),
        }
    }

    pub fn write_students<'a, I>(&mut self, students: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Student>,
    {
        for student in students {
            self.writer.serialize(RosterRecord::from(student))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
