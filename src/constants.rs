pub const DEFAULT_REGISTRY_URL: &str =
    "https://download.cms.gov/nppes/NPPES_Data_Dissemination_January_2024.zip";
