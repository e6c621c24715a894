//! GraphQL documents used by the field-data plan

/// Critical query: fields, farm ownership, boundary and crop season core data
pub const COMBINED_DATA_BASE: &str = r#"
query CombinedDataBase(
    $farmUuids: [UUID!]!,
    $languageCode: String!,
    $cropSeasonLifeCycleStates: [LifecycleState]!,
    $withBoundary: Boolean!
) {
  fieldsV2(farmUuids: $farmUuids) {
    uuid
    name
    area
    farmV2 { uuid name latitude longitude owner { firstName lastName email } }
    boundary @include(if: $withBoundary)
    cropSeasonsV2(lifecycleState: $cropSeasonLifeCycleStates) {
      uuid
      startDate
      yield
      yieldExpectation
      lifecycleState
      crop(languageCode: $languageCode) { uuid name }
      variety(languageCode: $languageCode) { name }
      activeGrowthStage { index gsOrder scale }
      cropEstablishmentDetails { seedBoxPerArea seedWeightPerSeedBox }
      cropEstablishmentGrowthStageIndex
      cropEstablishmentMethodCode
      cropSeasonNutritionProgram { uuid nutritionTargetRates { nutrientUuid rate } }
      timingStressesInfo { stressV2(languageCode: $languageCode) { uuid stressTypeCode name } }
    }
  }
}
"#;

/// Recommendations, windows and status time series per crop season
pub const COMBINED_DATA_INSIGHTS: &str = r#"
query CombinedDataInsights(
    $farmUuids: [UUID!]!,
    $fromDate: Date!,
    $tillDate: Date!,
    $cropSeasonLifeCycleStates: [LifecycleState]!,
    $withrisk: Boolean = false
) {
  fieldsV2(farmUuids: $farmUuids) {
    uuid
    cropSeasonsV2(lifecycleState: $cropSeasonLifeCycleStates) {
      uuid
      actionRecommendations { startDate endDate status actionType: type confidenceLevel }
      nutritionRecommendations(fromDate: $fromDate, tillDate: $tillDate) { startDate endDate status actionType }
      waterRecommendations { startDate endDate description actionType }
      actionWindows(fromDate: $fromDate, tillDate: $tillDate) { startDate endDate actionType status cropSeasonUuid }
      cropSeasonStatus { startDate endDate status type }
      weedManagementRecommendations { startDate endDate status type confidenceLevel }
      nutritionStatus { startDate endDate status }
      waterStatus(fromDate: $fromDate, tillDate: $tillDate) { startDate endDate status }
      risks(fromDate: $fromDate, tillDate: $tillDate, status: [HIGH, MEDIUM_HIGH, MEDIUM, MEDIUM_LOW, PROTECTED]) @include(if: $withrisk) {
        startDate endDate status stressV2 { uuid }
      }
    }
  }
}
"#;

/// Growth stage predictions per crop season
pub const COMBINED_DATA_PREDICTIONS: &str = r#"
query CombinedDataPredictions(
    $farmUuids: [UUID!]!,
    $languageCode: String!,
    $countryCode: String!,
    $cropSeasonLifeCycleStates: [LifecycleState]!
) {
  fieldsV2(farmUuids: $farmUuids) {
    uuid
    cropSeasonsV2(lifecycleState: $cropSeasonLifeCycleStates) {
      uuid
      countryCropGrowthStagePredictions {
        index startDate endDate scale gsOrder
        cropGrowthStageV2(languageCode: $languageCode, countryCode: $countryCode) { uuid name code }
      }
    }
  }
}
"#;

/// Field tasks; each task family is toggled by its own `with*` flag
pub const COMBINED_FIELD_DATA_TASKS: &str = r#"
query CombinedFieldData(
    $farmUuids: [UUID!]!,
    $languageCode: String!,
    $cropSeasonLifeCycleStates: [LifecycleState]!,
    $withBoundary: Boolean!,
    $withCropSeasonsV2: Boolean!,
    $withHarvests: Boolean!,
    $withCropEstablishments: Boolean!,
    $withLandPreparations: Boolean!,
    $withDroneFlights: Boolean!,
    $withSeedTreatments: Boolean!,
    $withSeedBoxTreatments: Boolean!,
    $withSmartSprayingTasks: Boolean!,
    $withWaterManagementTasks: Boolean!,
    $withScoutingTasks: Boolean!,
    $withObservations: Boolean!,
    $withSprayingsV2: Boolean!,
    $withSoilSamplingTasks: Boolean!
) {
  fieldsV2(farmUuids: $farmUuids) {
    uuid
    boundary @include(if: $withBoundary)
    cropSeasonsV2(lifecycleState: $cropSeasonLifeCycleStates) @include(if: $withCropSeasonsV2) {
      uuid
      harvests @include(if: $withHarvests) { uuid plannedDate executionDate state assignmentState note yield harvestMethodCode }
      observations @include(if: $withObservations) { uuid executionDate }
      smartSprayingTasksV2 @include(if: $withSmartSprayingTasks) { uuid plannedDate executionDate state note }
      sprayingsV2 @include(if: $withSprayingsV2) {
        uuid plannedDate executionDate state assignmentState note
        dosedMap { applicationType recipeV2 { uuid name type totalApplication unit } }
      }
      seedTreatmentTasks @include(if: $withSeedTreatments) { uuid plannedDate executionDate state note }
      seedBoxTreatments @include(if: $withSeedBoxTreatments) { uuid plannedDate executionDate state note }
      cropEstablishments @include(if: $withCropEstablishments) { uuid assignmentState note }
      landPreparations @include(if: $withLandPreparations) { uuid plannedDate executionDate state tillageDepth processedArea }
      waterManagementTasks @include(if: $withWaterManagementTasks) { uuid plannedDate executionDate state type waterHeight }
      scoutingTasks @include(if: $withScoutingTasks) { uuid plannedDate executionDate state note }
      droneFlights @include(if: $withDroneFlights) { uuid status plannedDate executedDate }
      soilSamplingTasks @include(if: $withSoilSamplingTasks) { uuid plannedDate executionDate state }
    }
  }
}
"#;

/// Risk, recommendation and status data, split across two calls by flags
pub const COMBINED_FIELD_DATA_RISK: &str = r#"
query CombinedFieldData(
    $farmUuids: [UUID!]!,
    $languageCode: String = "en",
    $cropSeasonLifeCycleStates: [LifecycleState]!,
    $fromDate: Date,
    $tillDate: Date,
    $withactionRecommendations: Boolean!,
    $withnutritionRecommendations: Boolean!,
    $withwaterRecommendations: Boolean!,
    $withactionWindows: Boolean!,
    $withweedManagementRecommendations: Boolean!,
    $withCropSeasonStatus: Boolean!,
    $withNutritionStatus: Boolean!,
    $withWaterStatus: Boolean!,
    $withrisk: Boolean!,
    $withtimingStressesInfo: Boolean = false
) {
  fieldsV2(farmUuids: $farmUuids) {
    uuid
    cropSeasonsV2(lifecycleState: $cropSeasonLifeCycleStates) {
      uuid
      actionRecommendations @include(if: $withactionRecommendations) { startDate endDate status actionType: type confidenceLevel }
      nutritionRecommendations(fromDate: $fromDate, tillDate: $tillDate) @include(if: $withnutritionRecommendations) { startDate endDate status actionType }
      waterRecommendations @include(if: $withwaterRecommendations) { startDate endDate description actionType }
      actionWindows(fromDate: $fromDate, tillDate: $tillDate) @include(if: $withactionWindows) { startDate endDate actionType status }
      weedManagementRecommendations @include(if: $withweedManagementRecommendations) { startDate endDate status type }
      cropSeasonStatus @include(if: $withCropSeasonStatus) { startDate endDate status type }
      nutritionStatus @include(if: $withNutritionStatus) { startDate endDate status }
      waterStatus(fromDate: $fromDate, tillDate: $tillDate) @include(if: $withWaterStatus) { startDate endDate status }
      risks(fromDate: $fromDate, tillDate: $tillDate, status: [HIGH, MEDIUM_HIGH, MEDIUM, MEDIUM_LOW, PROTECTED]) @include(if: $withrisk) {
        startDate endDate status stressV2 { uuid }
      }
      timingStressesInfo @include(if: $withtimingStressesInfo) { stressV2(languageCode: $languageCode) { uuid name } }
    }
  }
}
"#;
