use crate::config::Config;
use crate::error::PortalError;
use crate::formula::Formula;

/// Build the redirect URL that sends a customer into the external
/// checkout for a quoted formula.
///
/// The checkout function receives the formula id and the quoted
/// amount; on success it redirects the customer back to the configured
/// return URL, whose handler marks the formula paid.
///
/// # Arguments
/// * `config` - Runtime configuration holding the checkout endpoint
/// * `formula` - The formula being paid for; must carry a quote
///
/// # Returns
/// * `Result<String, PortalError>` - The redirect URL, or a validation
///   error when no quote has been provided
pub fn create_checkout(config: &Config, formula: &Formula) -> Result<String, PortalError> {
    let amount = formula.quote_amount.ok_or_else(|| {
        PortalError::validation("No quote has been provided for this formula")
    })?;

    Ok(format!(
        "{}?formula_id={}&amount={:.2}&return_url={}",
        config.checkout_url,
        formula.id,
        amount,
        urlencoding::encode(&config.payment_return_url),
    ))
}
