pub const AQ_DESCRIPTOR_SIZE: usize = 32;

// Above this, indirect buffers need the LB flag
pub const AQ_LARGE_BUF: usize = 512;

pub const HMC_PAGE_SIZE: usize = 4096;

pub const HMC_MAX_BP_COUNT: usize = 512;

pub const HMC_SD_PAGE_SIZE: usize = HMC_PAGE_SIZE * HMC_MAX_BP_COUNT;

pub const HMC_L2OBJ_BASE_ALIGNMENT: usize = 512;

// GLHMC_LAN*BASE hold FPM offsets in units of this
pub const HMC_FPM_BASE_UNIT: usize = 512;

pub const HMC_MAX_SD_COUNT: usize = 4096;

pub const RSS_KEY_SIZE: usize = 52;

pub const RSS_VSI_LUT_SIZE: usize = 64;

pub const RSS_PF_LUT_SIZE: usize = 512;

pub const VSI_PROPERTIES_SIZE: usize = 128;
