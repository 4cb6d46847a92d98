// 📋 Template Registry - One schema per (bank, product) upload format
//
// Templates are compiled-in constants. Supporting a new bank/product sheet
// means adding an entry to TEMPLATES; no lookup or ingestion code changes.

use crate::error::CaseFileError;
use crate::fields::FieldRegistry;
use serde::Serialize;

// ============================================================================
// TEMPLATE
// ============================================================================

/// Immutable schema for one bank × product spreadsheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Template {
    pub bank_id: &'static str,
    pub product_id: &'static str,
    /// Display name of the bank for listings; records carry `bank_id` instead
    pub bank_name: &'static str,
    /// e.g. "DBBL-CreditCard"
    pub name: &'static str,
    /// Headers that must be present, in documentation order
    pub required_columns: &'static [&'static str],
    /// Header → canonical field name
    pub column_map: &'static [(&'static str, &'static str)],
    /// One fully-populated example row, keyed by header
    pub sample_row: &'static [(&'static str, &'static str)],
}

impl Template {
    pub fn key(&self) -> (&'static str, &'static str) {
        (self.bank_id, self.product_id)
    }

    /// Canonical field for an exact template header
    pub fn canonical_for(&self, header: &str) -> Option<&'static str> {
        self.column_map
            .iter()
            .find(|(h, _)| *h == header)
            .map(|(_, field)| *field)
    }

    /// All documented headers: required columns first, then the optional
    /// mapped ones in map order.
    pub fn headers(&self) -> Vec<&'static str> {
        let mut headers: Vec<&'static str> = self.required_columns.to_vec();
        for (header, _) in self.column_map {
            if !headers.contains(header) {
                headers.push(header);
            }
        }
        headers
    }

    pub fn sample_value(&self, header: &str) -> Option<&'static str> {
        self.sample_row
            .iter()
            .find(|(h, _)| *h == header)
            .map(|(_, value)| *value)
    }

    /// Check the template's structural invariants.
    ///
    /// - at least one required column
    /// - every required column maps to a non-empty canonical field
    /// - no header is mapped twice
    /// - the sample row populates every documented header
    pub fn check(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.required_columns.is_empty() {
            problems.push(format!("{}: no required columns", self.name));
        }

        for column in self.required_columns {
            match self.canonical_for(column) {
                Some(field) if !field.trim().is_empty() => {}
                _ => problems.push(format!(
                    "{}: required column '{}' has no canonical field",
                    self.name, column
                )),
            }
        }

        for (i, (header, _)) in self.column_map.iter().enumerate() {
            if self.column_map[..i].iter().any(|(h, _)| h == header) {
                problems.push(format!("{}: header '{}' mapped twice", self.name, header));
            }
        }

        for header in self.headers() {
            match self.sample_value(header) {
                Some(value) if !value.is_empty() => {}
                _ => problems.push(format!(
                    "{}: sample row has no value for '{}'",
                    self.name, header
                )),
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

// ============================================================================
// COMPILED-IN TEMPLATES
// ============================================================================

pub static TEMPLATES: &[Template] = &[
    // 1. Dutch-Bangla Bank credit cards
    Template {
        bank_id: "DBBL",
        product_id: "CreditCard",
        bank_name: "Dutch-Bangla Bank",
        name: "DBBL-CreditCard",
        required_columns: &["SI No", "Card", "Client ID", "Name", "Outstanding"],
        column_map: &[
            ("SI No", "serialNo"),
            ("Card", "cardNo"),
            ("Client ID", "clientId"),
            ("Name", "clientName"),
            ("Outstanding", "outstanding"),
            ("File No", "fileNo"),
            ("Limit", "creditLimit"),
            ("Minimum Due", "minimumDue"),
            ("Mobile", "mobile"),
            ("Address", "address"),
            ("Last Payment Date", "lastPaymentDate"),
            ("Last Payment Amount", "lastPaymentAmount"),
            ("Agent Name", "agentName"),
            ("Allegation Date", "allegationDate"),
            ("Expiry Date", "expiryDate"),
        ],
        sample_row: &[
            ("SI No", "001"),
            ("Card", "4321-XXXX-XXXX-1234"),
            ("Client ID", "CL1001"),
            ("Name", "Rahim Uddin"),
            ("Outstanding", "50000"),
            ("File No", "DB-CC-0001"),
            ("Limit", "100000"),
            ("Minimum Due", "2500"),
            ("Mobile", "01711000000"),
            ("Address", "House 12, Road 5, Dhanmondi, Dhaka"),
            ("Last Payment Date", "2024-01-15"),
            ("Last Payment Amount", "5000"),
            ("Agent Name", "Jane"),
            ("Allegation Date", "2024-02-01"),
            ("Expiry Date", "2025-02-01"),
        ],
    },
    // 2. Dutch-Bangla Bank loans
    Template {
        bank_id: "DBBL",
        product_id: "Loan",
        bank_name: "Dutch-Bangla Bank",
        name: "DBBL-Loan",
        required_columns: &[
            "SL",
            "Account No",
            "Customer ID",
            "Customer Name",
            "Total Outstanding",
        ],
        column_map: &[
            ("SL", "serialNo"),
            ("Account No", "accountNo"),
            ("Customer ID", "clientId"),
            ("Customer Name", "customerName"),
            ("Total Outstanding", "totalOutstanding"),
            ("Disbursed Amount", "disbursedAmount"),
            ("Disbursement Date", "disbursementDate"),
            ("Interest Rate", "interestRate"),
            ("EMI", "emiAmount"),
            ("Overdue Amount", "overdueAmount"),
            ("Mobile No", "mobile"),
            ("Present Address", "presentAddress"),
            ("Permanent Address", "permanentAddress"),
            ("Branch", "branch"),
            ("Current Agent", "currentAgent"),
        ],
        sample_row: &[
            ("SL", "1"),
            ("Account No", "1051100012345"),
            ("Customer ID", "CUST-7781"),
            ("Customer Name", "Karim Hossain"),
            ("Total Outstanding", "125000.50"),
            ("Disbursed Amount", "300000"),
            ("Disbursement Date", "2021-06-10"),
            ("Interest Rate", "9.5"),
            ("EMI", "8500"),
            ("Overdue Amount", "25500"),
            ("Mobile No", "01819000000"),
            ("Present Address", "Flat 3B, Mirpur 10, Dhaka"),
            ("Permanent Address", "Village Char, Comilla"),
            ("Branch", "Motijheel"),
            ("Current Agent", "Jane"),
        ],
    },
    // 3. BRAC Bank credit cards
    Template {
        bank_id: "BRAC",
        product_id: "CreditCard",
        bank_name: "BRAC Bank",
        name: "BRAC-CreditCard",
        required_columns: &[
            "Serial",
            "Card Number",
            "CIF",
            "Card Holder Name",
            "Outstanding Incl. Commission",
        ],
        column_map: &[
            ("Serial", "serialNo"),
            ("Card Number", "cardNo"),
            ("CIF", "clientId"),
            ("Card Holder Name", "cardHolderName"),
            ("Outstanding Incl. Commission", "outstandingWithCommission"),
            ("File Number", "fileNo"),
            ("Principal Outstanding", "principalOutstanding"),
            ("Commission Rate", "commissionRate"),
            ("Credit Limit", "creditLimit"),
            ("Contact No", "mobile"),
            ("Home Address", "address"),
            ("Office Address", "officeAddress"),
            ("Agent Name", "agentName"),
            ("Allegation Date", "allegationDate"),
        ],
        sample_row: &[
            ("Serial", "1"),
            ("Card Number", "5500-XXXX-XXXX-9876"),
            ("CIF", "CIF009912"),
            ("Card Holder Name", "Nasrin Akter"),
            ("Outstanding Incl. Commission", "78250"),
            ("File Number", "BR-CC-0107"),
            ("Principal Outstanding", "70000"),
            ("Commission Rate", "11.75"),
            ("Credit Limit", "150000"),
            ("Contact No", "01911000000"),
            ("Home Address", "Road 27, Gulshan 1, Dhaka"),
            ("Office Address", "Tejgaon I/A, Dhaka"),
            ("Agent Name", "Jane"),
            ("Allegation Date", "2024-03-01"),
        ],
    },
    // 4. BRAC Bank loans
    Template {
        bank_id: "BRAC",
        product_id: "Loan",
        bank_name: "BRAC Bank",
        name: "BRAC-Loan",
        required_columns: &[
            "Serial",
            "Loan Account",
            "CIF",
            "Customer Name",
            "Total Outstanding",
        ],
        column_map: &[
            ("Serial", "serialNo"),
            ("Loan Account", "accountNo"),
            ("CIF", "clientId"),
            ("Customer Name", "customerName"),
            ("Total Outstanding", "totalOutstanding"),
            ("Principal Outstanding", "principalOutstanding"),
            ("Interest Rate", "interestRate"),
            ("EMI Amount", "emiAmount"),
            ("Phone", "phone"),
            ("Present Address", "presentAddress"),
            ("Current Agent", "currentAgent"),
            ("Expiry Date", "expiryDate"),
        ],
        sample_row: &[
            ("Serial", "1"),
            ("Loan Account", "LN-2201-0044"),
            ("CIF", "CIF118822"),
            ("Customer Name", "Abdul Malek"),
            ("Total Outstanding", "452000"),
            ("Principal Outstanding", "410000"),
            ("Interest Rate", "10.25"),
            ("EMI Amount", "12600"),
            ("Phone", "01552000000"),
            ("Present Address", "Agrabad, Chattogram"),
            ("Current Agent", "Jane"),
            ("Expiry Date", "2025-06-30"),
        ],
    },
    // 5. City Bank credit cards
    Template {
        bank_id: "CITY",
        product_id: "CreditCard",
        bank_name: "City Bank",
        name: "CITY-CreditCard",
        required_columns: &["Seq", "Card No", "Client Code", "Card Holder", "Outstanding"],
        column_map: &[
            ("Seq", "serialNo"),
            ("Card No", "cardNo"),
            ("Client Code", "clientId"),
            ("Card Holder", "cardHolderName"),
            ("Outstanding", "outstanding"),
            ("Card Limit", "creditLimit"),
            ("Minimum Due", "minimumDue"),
            ("Mobile", "mobile"),
            ("Billing Address", "address"),
            ("Last Payment Date", "lastPaymentDate"),
            ("Agent", "agentName"),
        ],
        sample_row: &[
            ("Seq", "1"),
            ("Card No", "3700-XXXXXX-X5501"),
            ("Client Code", "CB-55012"),
            ("Card Holder", "Farhana Islam"),
            ("Outstanding", "33410.75"),
            ("Card Limit", "200000"),
            ("Minimum Due", "1670"),
            ("Mobile", "01611000000"),
            ("Billing Address", "Uttara Sector 7, Dhaka"),
            ("Last Payment Date", "2023-12-20"),
            ("Agent", "Jane"),
        ],
    },
    // 6. City Bank loans
    Template {
        bank_id: "CITY",
        product_id: "Loan",
        bank_name: "City Bank",
        name: "CITY-Loan",
        required_columns: &["Seq", "Loan No", "Client Code", "Borrower Name", "Outstanding"],
        column_map: &[
            ("Seq", "serialNo"),
            ("Loan No", "accountNo"),
            ("Client Code", "clientId"),
            ("Borrower Name", "customerName"),
            ("Outstanding", "outstanding"),
            ("File No", "fileNo"),
            ("Disbursed Amount", "disbursedAmount"),
            ("Overdue Amount", "overdueAmount"),
            ("Interest Rate", "interestRate"),
            ("Mobile", "mobile"),
            ("Address", "address"),
            ("Current Agent", "currentAgent"),
            ("Remarks", "remarks"),
        ],
        sample_row: &[
            ("Seq", "1"),
            ("Loan No", "CBL-LN-88120"),
            ("Client Code", "CB-90211"),
            ("Borrower Name", "Mizanur Rahman"),
            ("Outstanding", "215000"),
            ("File No", "CT-LN-0310"),
            ("Disbursed Amount", "500000"),
            ("Overdue Amount", "42000"),
            ("Interest Rate", "11"),
            ("Mobile", "01711999999"),
            ("Address", "Zindabazar, Sylhet"),
            ("Current Agent", "Jane"),
            ("Remarks", "Promised payment after Eid"),
        ],
    },
];

// ============================================================================
// TEMPLATE REGISTRY
// ============================================================================

/// Read-only catalog of upload templates keyed by (bank, product).
#[derive(Debug, Clone, Copy)]
pub struct TemplateRegistry {
    templates: &'static [Template],
}

impl TemplateRegistry {
    pub fn new() -> Self {
        TemplateRegistry {
            templates: TEMPLATES,
        }
    }

    /// Look up the template for a bank/product pair.
    ///
    /// Ids are compared case-insensitively after trimming, so "dbbl" and
    /// " creditcard " resolve like "DBBL" / "CreditCard".
    pub fn resolve(&self, bank_id: &str, product_id: &str) -> Result<&'static Template, CaseFileError> {
        let bank = bank_id.trim();
        let product = product_id.trim();

        self.templates
            .iter()
            .find(|t| t.bank_id.eq_ignore_ascii_case(bank) && t.product_id.eq_ignore_ascii_case(product))
            .ok_or_else(|| CaseFileError::TemplateNotFound {
                bank_id: bank_id.to_string(),
                product_id: product_id.to_string(),
            })
    }

    /// Find a template by its display name (e.g. "DBBL-CreditCard")
    pub fn by_name(&self, name: &str) -> Option<&'static Template> {
        self.templates
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn all(&self) -> &'static [Template] {
        self.templates
    }

    /// Distinct bank ids, in catalog order
    pub fn banks(&self) -> Vec<&'static str> {
        let mut banks: Vec<&'static str> = Vec::new();
        for t in self.templates {
            if !banks.contains(&t.bank_id) {
                banks.push(t.bank_id);
            }
        }
        banks
    }

    pub fn products_for(&self, bank_id: &str) -> Vec<&'static str> {
        self.templates
            .iter()
            .filter(|t| t.bank_id.eq_ignore_ascii_case(bank_id.trim()))
            .map(|t| t.product_id)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.templates.len()
    }

    /// Run `Template::check` on every template and confirm every mapped field
    /// name is known to the field catalog.
    pub fn check_all(&self, fields: &FieldRegistry) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        for (i, template) in self.templates.iter().enumerate() {
            if let Err(mut errs) = template.check() {
                problems.append(&mut errs);
            }

            for (header, field) in template.column_map {
                if !fields.contains(field) {
                    problems.push(format!(
                        "{}: header '{}' maps to unknown field '{}'",
                        template.name, header, field
                    ));
                }
            }

            if self.templates[..i].iter().any(|other| other.key() == template.key()) {
                problems.push(format!("{}: duplicate (bank, product) key", template.name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_six_templates() {
        let registry = TemplateRegistry::new();
        assert_eq!(registry.count(), 6);
        assert_eq!(registry.banks(), vec!["DBBL", "BRAC", "CITY"]);
        assert_eq!(registry.products_for("brac"), vec!["CreditCard", "Loan"]);
    }

    #[test]
    fn test_resolve_dbbl_credit_card() {
        let registry = TemplateRegistry::new();
        let template = registry.resolve("DBBL", "CreditCard").unwrap();

        assert_eq!(template.name, "DBBL-CreditCard");
        assert_eq!(
            template.required_columns,
            &["SI No", "Card", "Client ID", "Name", "Outstanding"]
        );
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = TemplateRegistry::new();
        let template = registry.resolve(" dbbl ", "creditcard").unwrap();
        assert_eq!(template.name, "DBBL-CreditCard");
    }

    #[test]
    fn test_resolve_unknown_pair() {
        let registry = TemplateRegistry::new();
        let err = registry.resolve("DBBL", "Mortgage").unwrap_err();

        assert_eq!(
            err,
            CaseFileError::TemplateNotFound {
                bank_id: "DBBL".to_string(),
                product_id: "Mortgage".to_string(),
            }
        );
    }

    #[test]
    fn test_all_templates_satisfy_invariants() {
        let registry = TemplateRegistry::new();
        let fields = FieldRegistry::new();

        if let Err(problems) = registry.check_all(&fields) {
            panic!("template problems:\n{}", problems.join("\n"));
        }
    }

    #[test]
    fn test_check_flags_unmapped_required_column() {
        let broken = Template {
            bank_id: "X",
            product_id: "Y",
            bank_name: "X Bank",
            name: "X-Y",
            required_columns: &["Name", "Balance"],
            column_map: &[("Name", "clientName"), ("Balance", "")],
            sample_row: &[("Name", "A"), ("Balance", "1")],
        };

        let problems = broken.check().unwrap_err();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("'Balance'"));
    }

    #[test]
    fn test_headers_put_required_first() {
        let registry = TemplateRegistry::new();
        let template = registry.resolve("CITY", "Loan").unwrap();
        let headers = template.headers();

        assert_eq!(&headers[..5], template.required_columns);
        assert_eq!(headers.len(), template.column_map.len());
    }

    #[test]
    fn test_by_name() {
        let registry = TemplateRegistry::new();
        let template = registry.by_name("brac-loan").unwrap();
        assert_eq!(template.key(), ("BRAC", "Loan"));
        assert!(registry.by_name("nope").is_none());
    }
}
