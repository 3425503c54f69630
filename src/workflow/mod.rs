//! Workflow services: tickets, recurring ticket templates and inspections.

pub mod inspections;
pub mod templates;
pub mod tickets;

pub use inspections::{GenerateSummary, InspectionGenerator, InspectionService, ScheduledInspection};
pub use templates::{ScheduleHit, TicketTemplateService, UpdateTicketTemplateRequest};
pub use tickets::{
    BatchItemResult, CreateTicketRequest, TicketFilter, TicketService, UpdateTicketStatusRequest,
};
