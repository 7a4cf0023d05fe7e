use chrono::{Local, NaiveDate};
use log::warn;

use crate::models::{
    AuthMethod, ChipAuthenticationStatus, DataGroupInventory, DocumentFamily, DocumentRecord, EepDetails,
    FamilyDetails, IdentityFields, ParsedMrzRecord, PassportDetails, SecurityInfoKind,
};
use crate::processing::pki::PKIProcessor;
use crate::validation::ExpiryValidator;
use crate::verification::bac::BacKey;

/// Merges the DG1 record and the decoded data groups into one record per
/// document family.
pub struct DocumentAssembler;

impl DocumentAssembler {
    pub fn assemble(inventory: DataGroupInventory, method: AuthMethod, key: &BacKey) -> DocumentRecord {
        Self::assemble_at(inventory, method, key, Local::now().naive_local().date())
    }

    pub fn assemble_at(inventory: DataGroupInventory, method: AuthMethod, key: &BacKey, today: NaiveDate) -> DocumentRecord {
        let hash_checks = match &inventory.sod {
            Some(sod) => PKIProcessor::compare_hashes(sod, &inventory.raw),
            None => Default::default(),
        };
        let data_groups_advertised = inventory
            .com
            .as_ref()
            .map(|com| com.data_groups.iter().copied().collect())
            .unwrap_or_default();
        let data_groups_read = inventory.read_groups();

        if inventory.mrz.is_none() {
            warn!("No DG1 record, identity falls back to the access key");
        }
        let family = inventory
            .mrz
            .as_ref()
            .map(|mrz| mrz.document_family)
            .unwrap_or(DocumentFamily::TD3);
        let identity = Self::identity(&inventory, key);
        let details = match family {
            DocumentFamily::TD3 => FamilyDetails::Passport(Self::passport_details(&inventory)),
            DocumentFamily::EEP => FamilyDetails::Eep(Self::eep_details(&inventory, &identity.date_of_expiry, today)),
        };

        DocumentRecord {
            identity,
            authentication: method,
            data_groups_advertised,
            data_groups_read,
            security_object: inventory.sod,
            hash_checks,
            details,
        }
    }

    fn display_name(mrz: &ParsedMrzRecord) -> Option<String> {
        mrz.chinese_name.clone().or_else(|| mrz.full_name())
    }

    fn identity(inventory: &DataGroupInventory, key: &BacKey) -> IdentityFields {
        let full_name = inventory.personal_details.as_ref().and_then(|d| d.full_name.clone());
        match &inventory.mrz {
            Some(mrz) => IdentityFields {
                name: full_name.or_else(|| Self::display_name(mrz)),
                primary_identifier: mrz.primary_identifier.clone(),
                secondary_identifier: mrz.secondary_identifier.clone(),
                document_code: Some(mrz.document_code.clone()),
                document_number: mrz.document_number.clone(),
                date_of_birth: mrz.date_of_birth.clone(),
                date_of_expiry: mrz.date_of_expiry.clone(),
                nationality: mrz.nationality.clone(),
                sex: mrz.sex.clone(),
                issuing_state: mrz.issuing_state.clone(),
                face_images: inventory.faces.clone(),
            },
            None => IdentityFields {
                name: full_name,
                primary_identifier: None,
                secondary_identifier: None,
                document_code: None,
                document_number: key.document_number().to_string(),
                date_of_birth: key.date_of_birth().to_string(),
                date_of_expiry: key.date_of_expiry().to_string(),
                nationality: None,
                sex: None,
                issuing_state: None,
                face_images: inventory.faces.clone(),
            },
        }
    }

    fn passport_details(inventory: &DataGroupInventory) -> PassportDetails {
        let chip_authentication = if inventory
            .security_infos
            .iter()
            .any(|info| info.kind == SecurityInfoKind::ChipAuthentication)
        {
            ChipAuthenticationStatus::NotPerformed
        } else {
            ChipAuthenticationStatus::NotAdvertised
        };
        PassportDetails {
            fingerprints: inventory.fingerprints.clone(),
            irises: inventory.irises.clone(),
            displayed_portraits: inventory.displayed_portraits.clone(),
            signatures: inventory.signatures.clone(),
            personal_details: inventory.personal_details.clone(),
            document_details: inventory.document_details.clone(),
            security_infos: inventory.security_infos.clone(),
            active_authentication_key: inventory.active_authentication_key.clone(),
            chip_authentication,
        }
    }

    fn eep_details(inventory: &DataGroupInventory, date_of_expiry: &str, today: NaiveDate) -> EepDetails {
        let document = inventory.document_details.as_ref();
        let endorsements = document
            .and_then(|d| d.endorsements_and_observations.as_deref())
            .map(|text| {
                text.split(['\n', ';'])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let is_expired = ExpiryValidator::is_expired_at(date_of_expiry, today).unwrap_or_else(|e| {
            warn!("{}", e);
            false
        });
        EepDetails {
            chinese_name: inventory.mrz.as_ref().and_then(|m| m.chinese_name.clone()),
            endorsements,
            issuing_authority: document.and_then(|d| d.issuing_authority.clone()),
            date_of_issue: document.and_then(|d| d.date_of_issue.clone()),
            is_expired,
            check_digits_valid: inventory
                .mrz
                .as_ref()
                .map(|m| m.check_digits.all_valid())
                .unwrap_or(false),
        }
    }
}
