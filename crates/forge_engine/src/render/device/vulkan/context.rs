//! Vulkan instance, surface and logical device bring-up

use std::collections::HashSet;
use std::ffi::{CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use log::{info, warn};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::render::device::{GpuError, GpuResult};

/// Instance plus optional validation messenger
pub struct VulkanInstance {
    /// Loader entry points
    pub entry: Entry,
    /// Instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance with the extensions the display needs
    pub fn new(display: RawDisplayHandle, app_name: &str, enable_validation: bool) -> GpuResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| GpuError::Initialization(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(app_name)
            .map_err(|_| GpuError::Initialization("Application name contains a NUL byte".to_string()))?;
        let engine_name = CString::new("Forge Engine")
            .map_err(|_| GpuError::Initialization("Engine name contains a NUL byte".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions = ash_window::enumerate_required_extensions(display)
            .map_err(|code| GpuError::api(code, "querying surface extensions"))?
            .to_vec();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let validation_layer = CString::new("VK_LAYER_KHRONOS_validation")
            .map_err(|_| GpuError::Initialization("Invalid layer name".to_string()))?;
        let layers: Vec<*const std::os::raw::c_char> = if enable_validation {
            vec![validation_layer.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|code| GpuError::api(code, "creating instance"))?;

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            match unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(code) => {
                    warn!("Validation messenger unavailable: {:?}", code);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self { entry, instance, debug })
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Chosen GPU and its queue families
pub struct PhysicalDeviceInfo {
    /// Physical device handle
    pub device: vk::PhysicalDevice,
    /// Memory heaps and types, cached for buffer allocation
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Graphics queue family
    pub graphics_family: u32,
    /// Present queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first GPU with graphics, present and swapchain support
    pub fn select(instance: &Instance, surface: vk::SurfaceKHR, surface_loader: &Surface) -> GpuResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|code| GpuError::api(code, "enumerating physical devices"))?;

        for device in devices {
            if let Some(info) = Self::evaluate(instance, device, surface, surface_loader)? {
                let properties = unsafe { instance.get_physical_device_properties(device) };
                info!("Selected GPU: {}", unsafe {
                    CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy()
                });
                return Ok(info);
            }
        }

        Err(GpuError::Initialization("No suitable GPU found".to_string()))
    }

    fn evaluate(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> GpuResult<Option<Self>> {
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in (0u32..).zip(queue_families.iter()) {
            if graphics_family.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics_family = Some(index);
            }
            let present_support = unsafe {
                surface_loader.get_physical_device_surface_support(device, index, surface)
            }
            .map_err(|code| GpuError::api(code, "querying present support"))?;
            if present_support && present_family.is_none() {
                present_family = Some(index);
            }
        }

        let (Some(graphics_family), Some(present_family)) = (graphics_family, present_family) else {
            return Ok(None);
        };

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .map_err(|code| GpuError::api(code, "enumerating device extensions"))?;
        let has_swapchain = extensions.iter().any(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Ok(None);
        }

        Ok(Some(Self {
            device,
            memory_properties: unsafe { instance.get_physical_device_memory_properties(device) },
            graphics_family,
            present_family,
        }))
    }

    /// Memory type index matching `type_filter` with all of `properties`
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> GpuResult<u32> {
        (0..self.memory_properties.memory_type_count)
            .find(|&i| {
                (type_filter & (1 << i)) != 0
                    && self.memory_properties.memory_types[i as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or(GpuError::NoSuitableMemoryType)
    }
}

/// Everything that lives for the whole device lifetime
pub struct VulkanContext {
    /// Logical device
    pub device: Device,
    /// Graphics queue
    pub graphics_queue: vk::Queue,
    /// Present queue
    pub present_queue: vk::Queue,
    /// Pool for every command buffer the renderer allocates
    pub command_pool: vk::CommandPool,
    /// Swapchain function loader
    pub swapchain_loader: SwapchainLoader,
    /// Surface function loader
    pub surface_loader: Surface,
    /// Window surface
    pub surface: vk::SurfaceKHR,
    /// Selected GPU
    pub physical_device: PhysicalDeviceInfo,
    /// Instance; dropped last
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Bring up instance, surface, device, queues and the command pool
    pub fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        app_name: &str,
        enable_validation: bool,
    ) -> GpuResult<Self> {
        let instance = VulkanInstance::new(display, app_name, enable_validation)?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = unsafe {
            ash_window::create_surface(&instance.entry, &instance.instance, display, window, None)
        }
        .map_err(|code| GpuError::api(code, "creating window surface"))?;

        let physical_device = PhysicalDeviceInfo::select(&instance.instance, surface, &surface_loader)?;

        let unique_families: HashSet<u32> = [physical_device.graphics_family, physical_device.present_family]
            .into_iter()
            .collect();
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let device_extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device.device, &device_info, None)
        }
        .map_err(|code| GpuError::api(code, "creating logical device"))?;

        let graphics_queue = unsafe { device.get_device_queue(physical_device.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical_device.present_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(physical_device.graphics_family);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(|code| GpuError::api(code, "creating command pool"))?;

        let swapchain_loader = SwapchainLoader::new(&instance.instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            command_pool,
            swapchain_loader,
            surface_loader,
            surface,
            physical_device,
            instance,
        })
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
