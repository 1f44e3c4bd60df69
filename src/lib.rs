/*!
# Formula Review Portal

A customer/admin portal for cosmetic-formula regulatory review, built in Rust.

## Overview

Customers upload their formulas as Excel workbooks and request a quote
for a regulatory review. Admins quote the work, review every ingredient
against the master compliance table (AICS, SUSMP and NZOIC reference
data), and send the customer a PDF report once the review is complete.
Payment happens through an external checkout redirect.

## Architecture

The application follows a client-server architecture:

### Web Layer
- **Technologies**: Rust, axum, tower
- **Key Components**:
  - JSON API under `/api` with cookie sessions
  - Authentication middleware with admin/customer roles
  - Multipart upload endpoints for formulas and the master table
  - Signed, expiring download links for uploads and reports

### Core Logic
- Formula status workflow - one-way lifecycle from upload to sent report,
  with conditional updates so concurrent transitions cannot collide
- Excel parser - converts uploaded workbooks into ingredient rows
- Auto-complete engine - enriches rows from the master compliance table
- Review builder - merges admin edits with auto-completed data and
  renders the final PDF report

### Data Persistence Layer
- JSON record files under a data directory
- Uploaded workbooks and generated reports stored alongside
- Master table bulk-replaced from admin spreadsheet uploads

## Modules

- **formula**: Formula record, status lifecycle and customer projection
- **workflow**: status transitions with their guards and side effects
- **ingredient**: ingredient and review payload types, read-path normalization
- **loader**: Excel parsing for formula uploads and master bulk uploads
- **autocomplete**: master-table enrichment of parsed ingredient rows
- **review**: review record builder, completion and report generation
- **downloader**: PDF report rendering, CSV export, upload template
- **store**: file-backed persistence and signed download links
- **login**: user accounts, sessions, profile cache
- **mailer**: customer notifications and password reset email
- **payment**: external checkout redirect
- **app**: routing and middleware

## REST API Endpoints

- `/api/formulas` - upload and list formulas
- `/api/formulas/{id}/request-quote`, `/quote`, `/pay` - quoting and payment
- `/api/formulas/{id}/parse` - parse and auto-complete an upload
- `/api/formulas/{id}/review` - load and save the review
- `/api/formulas/{id}/report` - generate the PDF report
- `/api/master` - bulk upload of the master compliance table
- `/files/signed/{token}` - signed downloads
*/

pub mod autocomplete;
pub mod config;
pub mod downloader;
pub mod error;
pub mod formula;
pub mod ingredient;
pub mod loader;
pub mod login;
pub mod retry;
pub mod review;
pub mod store;
pub mod workflow;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod mailer;
#[cfg(feature = "web")]
pub mod payment;

/// Re-export the core types to make them easier to use
pub use error::PortalError;
pub use formula::{CustomerStatus, Formula, FormulaStatus};
pub use ingredient::{ensure_review_data_format, Ingredient, MasterIngredient, ReviewData};
pub use loader::ParsedFormula;
pub use review::Review;
pub use store::Store;
